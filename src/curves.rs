//! Parametric derating curves (§4.1) and the plant's interpolation tables
//! (§4.2). All pure functions, no state.

/// A non-negative `(charge, discharge)` C-rate pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CRatePair {
    pub charge: f64,
    pub discharge: f64,
}

/// Linear interpolation over a sorted breakpoint table, clamped flat outside
/// the domain. `points` must be sorted ascending by `.0` and non-empty.
fn interp1d(points: &[(f64, f64)], x: f64) -> f64 {
    debug_assert!(!points.is_empty());
    if x <= points[0].0 {
        return points[0].1;
    }
    let last = points.len() - 1;
    if x >= points[last].0 {
        return points[last].1;
    }
    for w in points.windows(2) {
        let (x0, y0) = w[0];
        let (x1, y1) = w[1];
        if x >= x0 && x <= x1 {
            if (x1 - x0).abs() < f64::EPSILON {
                return y0;
            }
            let t = (x - x0) / (x1 - x0);
            return y0 + t * (y1 - y0);
        }
    }
    points[last].1
}

const TEMP_CHARGE: &[(f64, f64)] = &[
    (-25.0, 0.0),
    (0.0, 0.0),
    (5.0, 0.0),
    (15.0, 3.0),
    (35.0, 3.0),
    (45.0, 2.0),
    (55.0, 0.0),
    (65.0, 0.0),
];

const TEMP_DISCHARGE: &[(f64, f64)] = &[
    (-25.0, 0.2),
    (-15.0, 0.2),
    (-10.0, 1.0),
    (-5.0, 1.5),
    (0.0, 2.0),
    (5.0, 4.5),
    (10.0, 5.0),
    (25.0, 5.0),
    (30.0, 4.5),
    (35.0, 4.0),
    (45.0, 3.8),
    (55.0, 3.8),
    (60.0, 0.2),
    (65.0, 0.2),
    (70.0, 0.0),
];

const SOC_CHARGE: &[(f64, f64)] = &[
    (0.0, 3.0),
    (0.85, 3.0),
    (0.90, 2.0),
    (0.95, 1.0),
    (1.0, 0.5),
];

const SOC_DISCHARGE: &[(f64, f64)] = &[
    (0.0, 1.0),
    (0.02, 1.0),
    (0.05, 2.2),
    (0.08, 2.2),
    (0.10, 4.0),
    (0.15, 4.0),
    (0.20, 5.0),
    (0.50, 5.0),
    (1.0, 5.0),
];

const CELL_V_CHARGE: &[(f64, f64)] = &[(3.000, 3.0), (4.100, 3.0), (4.200, 0.0)];

const CELL_V_DISCHARGE: &[(f64, f64)] = &[
    (3.000, 0.0),
    (3.200, 0.0),
    (3.300, 2.0),
    (3.400, 2.5),
    (3.450, 3.8),
    (3.550, 5.0),
    (4.200, 5.0),
];

/// Temperature derating curve (§4.1 table, row 1).
pub fn temperature_curve(temperature_c: f64) -> CRatePair {
    CRatePair {
        charge: interp1d(TEMP_CHARGE, temperature_c).max(0.0),
        discharge: interp1d(TEMP_DISCHARGE, temperature_c).max(0.0),
    }
}

/// State-of-charge derating curve (§4.1 table, row 2).
pub fn soc_curve(soc: f64) -> CRatePair {
    CRatePair {
        charge: interp1d(SOC_CHARGE, soc).max(0.0),
        discharge: interp1d(SOC_DISCHARGE, soc).max(0.0),
    }
}

/// Cell-voltage derating curve (§4.1 table, row 3).
pub fn cell_voltage_curve(cell_voltage_v: f64) -> CRatePair {
    CRatePair {
        charge: interp1d(CELL_V_CHARGE, cell_voltage_v).max(0.0),
        discharge: interp1d(CELL_V_DISCHARGE, cell_voltage_v).max(0.0),
    }
}

// ---------------------------------------------------------------------
// Plant-only tables: 2-D resistance lookup and the NMC OCV curve. These
// support `plant::EquivalentCircuitPlant` (a reference implementation, not
// part of the control core's contract) but live here because they are the
// same clamped-interpolation shape as the curves above.
// ---------------------------------------------------------------------

/// Bilinear interpolation over a 2-D table indexed by ascending `(T, soc)`
/// grid axes. Clamps to the grid edges outside the domain.
pub fn bilinear(t_axis: &[f64], soc_axis: &[f64], table: &[&[f64]], t: f64, soc: f64) -> f64 {
    debug_assert_eq!(table.len(), t_axis.len());
    let ti = clamp_index(t_axis, t);
    let si = clamp_index(soc_axis, soc);

    let (t0, t1) = (ti.0, ti.1);
    let (s0, s1) = (si.0, si.1);

    let q11 = table[t0][s0];
    let q21 = table[t1][s0];
    let q12 = table[t0][s1];
    let q22 = table[t1][s1];

    let tw = if t1 == t0 {
        0.0
    } else {
        ((t - t_axis[t0]) / (t_axis[t1] - t_axis[t0])).clamp(0.0, 1.0)
    };
    let sw = if s1 == s0 {
        0.0
    } else {
        ((soc - soc_axis[s0]) / (soc_axis[s1] - soc_axis[s0])).clamp(0.0, 1.0)
    };

    let top = q11 + sw * (q12 - q11);
    let bottom = q21 + sw * (q22 - q21);
    top + tw * (bottom - top)
}

/// Returns the (lower, upper) grid indices bracketing `x`, clamped at the
/// edges when `x` is outside the axis.
fn clamp_index(axis: &[f64], x: f64) -> (usize, usize) {
    if x <= axis[0] {
        return (0, 0);
    }
    let last = axis.len() - 1;
    if x >= axis[last] {
        return (last, last);
    }
    for i in 0..last {
        if x >= axis[i] && x <= axis[i + 1] {
            return (i, i + 1);
        }
    }
    (last, last)
}

/// 24-point NMC 622 open-circuit-voltage curve, OCV(SoC).
const OCV_SOC_AXIS: &[f64] = &[
    0.00, 0.02, 0.04, 0.06, 0.08, 0.10, 0.15, 0.20, 0.25, 0.30, 0.35, 0.40, 0.45, 0.50, 0.55, 0.60,
    0.65, 0.70, 0.75, 0.80, 0.85, 0.90, 0.95, 1.00,
];
const OCV_VOLTAGE: &[f64] = &[
    3.000, 3.250, 3.370, 3.420, 3.450, 3.470, 3.500, 3.520, 3.540, 3.560, 3.580, 3.600, 3.620,
    3.650, 3.680, 3.710, 3.740, 3.780, 3.830, 3.890, 3.960, 4.040, 4.120, 4.200,
];

/// Open-circuit voltage of a single cell as a function of SoC.
pub fn ocv_cell_v(soc: f64) -> f64 {
    let points: Vec<(f64, f64)> = OCV_SOC_AXIS
        .iter()
        .zip(OCV_VOLTAGE.iter())
        .map(|(&s, &v)| (s, v))
        .collect();
    interp1d(&points, soc.clamp(0.0, 1.0))
}
