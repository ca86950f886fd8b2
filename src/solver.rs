//! Kirchhoff current-distribution solver (§4.4).
//!
//! Pure over a snapshot of connected packs' open-circuit voltages,
//! resistances, and limits — no reference back to pack or array
//! controllers. Grounded in `original_source/corvus_demo.py`'s v4
//! changelog: forced-current and equalization share one clamp-and-solve
//! loop, capped at the connected-pack count, with a defensive re-clamp
//! pass afterward.

/// One connected pack's inputs to the solver, indexed by the pack's id.
#[derive(Debug, Clone, Copy)]
pub struct PackSolverInput {
    pub id: usize,
    pub ocv_v: f64,
    pub r_ohm: f64,
    pub charge_limit_a: f64,
    pub discharge_limit_a: f64,
}

/// Outcome of a solve: each connected pack's current plus the bus voltage
/// the solver settled on.
#[derive(Debug, Clone)]
pub struct SolveResult {
    pub currents_a: Vec<(usize, f64)>,
    pub bus_voltage_v: f64,
}

/// Solves for per-pack currents against a requested total bus current,
/// clamped to the array's aggregate limits before solving. Passing
/// `requested_current_a = 0.0` runs the equalization path (§4.4).
///
/// `reclamp_margin` is the fractional headroom (e.g. 1.01) allowed before
/// the defensive post-solve re-clamp kicks in. `residual_tolerance` is the
/// fraction of `|I_req| + eps` accepted as KCL residual after the
/// iteration cap is exhausted.
pub fn solve(
    packs: &[PackSolverInput],
    requested_current_a: f64,
    array_charge_limit_a: f64,
    array_discharge_limit_a: f64,
    reclamp_margin: f64,
    residual_tolerance: f64,
) -> Option<SolveResult> {
    if packs.is_empty() {
        return None;
    }

    let i_req = if requested_current_a > 0.0 {
        requested_current_a.min(array_charge_limit_a)
    } else if requested_current_a < 0.0 {
        requested_current_a.max(-array_discharge_limit_a)
    } else {
        0.0
    };

    let mut active: Vec<usize> = (0..packs.len()).collect();
    let mut clamped: Vec<(usize, f64)> = Vec::new();

    let iteration_cap = packs.len();
    let mut iterations = 0;
    let mut final_voltage = 0.0;

    loop {
        iterations += 1;

        let g: f64 = active.iter().map(|&i| 1.0 / packs[i].r_ohm).sum();
        if g < 1e-12 {
            // Degenerate conductance: terminate without changing bus
            // voltage (§7 solver degeneracies).
            return None;
        }
        let s: f64 = active.iter().map(|&i| packs[i].ocv_v / packs[i].r_ohm).sum();
        let clamped_sum: f64 = clamped.iter().map(|&(_, i)| i).sum();

        let v = if requested_current_a == 0.0 {
            (s - clamped_sum) / g
        } else {
            let residual = i_req - clamped_sum;
            (s + residual) / g
        };
        final_voltage = v;

        let mut newly_clamped = Vec::new();
        let mut still_active = Vec::new();
        for &i in &active {
            let pack = &packs[i];
            let current = (v - pack.ocv_v) / pack.r_ohm;
            if current > 0.0 && current > pack.charge_limit_a {
                newly_clamped.push((i, pack.charge_limit_a));
            } else if current < 0.0 && -current > pack.discharge_limit_a {
                newly_clamped.push((i, -pack.discharge_limit_a));
            } else {
                still_active.push(i);
            }
        }

        if newly_clamped.is_empty() {
            let mut currents_a: Vec<(usize, f64)> = active
                .iter()
                .map(|&i| {
                    let pack = &packs[i];
                    (pack.id, (v - pack.ocv_v) / pack.r_ohm)
                })
                .collect();
            currents_a.extend(clamped.iter().map(|&(i, current)| (packs[i].id, current)));
            return Some(reclamp(currents_a, packs, v, reclamp_margin));
        }

        clamped.extend(newly_clamped);
        active = still_active;

        if active.is_empty() || iterations >= iteration_cap {
            break;
        }
    }

    // Iteration cap exhausted (or all packs clamped): accept the residual
    // if it is within tolerance, otherwise still commit — the defensive
    // re-clamp pass below is the real backstop.
    let achieved: f64 = clamped.iter().map(|&(_, i)| i).sum::<f64>()
        + active
            .iter()
            .map(|&i| (final_voltage - packs[i].ocv_v) / packs[i].r_ohm)
            .sum::<f64>();
    let eps = 1e-6;
    let residual = (achieved - i_req).abs();
    let tolerance = residual_tolerance * (i_req.abs() + eps);
    if residual > tolerance && requested_current_a != 0.0 {
        log::warn!(
            "solver: KCL residual {:.3} A exceeds tolerance {:.3} A after {} iterations",
            residual,
            tolerance,
            iterations
        );
    }

    if active.is_empty() {
        // All packs clamped before convergence: bus voltage is the mean
        // of OCV + I*R across the clamped set (§4.4).
        let mean_v = clamped
            .iter()
            .map(|&(i, current)| packs[i].ocv_v + current * packs[i].r_ohm)
            .sum::<f64>()
            / clamped.len() as f64;
        let currents_a: Vec<(usize, f64)> = clamped.iter().map(|&(i, current)| (packs[i].id, current)).collect();
        return Some(reclamp(currents_a, packs, mean_v, reclamp_margin));
    }

    let mut currents_a: Vec<(usize, f64)> = active
        .iter()
        .map(|&i| {
            let pack = &packs[i];
            (pack.id, (final_voltage - pack.ocv_v) / pack.r_ohm)
        })
        .collect();
    currents_a.extend(clamped.iter().map(|&(i, current)| (packs[i].id, current)));
    Some(reclamp(currents_a, packs, final_voltage, reclamp_margin))
}

fn reclamp(mut currents_a: Vec<(usize, f64)>, packs: &[PackSolverInput], bus_voltage_v: f64, margin: f64) -> SolveResult {
    let by_id = |id: usize| packs.iter().find(|p| p.id == id).expect("solved pack id must be present");
    for (id, current) in currents_a.iter_mut() {
        let pack = by_id(*id);
        if *current > 0.0 {
            let cap = pack.charge_limit_a * margin;
            if *current > cap {
                *current = cap;
            }
        } else if *current < 0.0 {
            let cap = pack.discharge_limit_a * margin;
            if -*current > cap {
                *current = -cap;
            }
        }
    }
    SolveResult {
        currents_a,
        bus_voltage_v,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack(id: usize, ocv_v: f64, r_ohm: f64, limit_a: f64) -> PackSolverInput {
        PackSolverInput {
            id,
            ocv_v,
            r_ohm,
            charge_limit_a: limit_a,
            discharge_limit_a: limit_a,
        }
    }

    #[test]
    fn single_pack_takes_entire_requested_current() {
        let packs = vec![pack(0, 800.0, 0.1, 500.0)];
        let result = solve(&packs, 200.0, 500.0, 500.0, 1.01, 0.01).unwrap();
        assert_eq!(result.currents_a.len(), 1);
        assert!((result.currents_a[0].1 - 200.0).abs() < 1e-6);
    }

    #[test]
    fn lowest_ocv_pack_takes_largest_share_under_charge() {
        let packs = vec![
            pack(0, 790.0, 0.1, 200.0),
            pack(1, 800.0, 0.1, 200.0),
            pack(2, 810.0, 0.1, 200.0),
        ];
        let result = solve(&packs, 200.0, 600.0, 600.0, 1.01, 0.01).unwrap();
        let sum: f64 = result.currents_a.iter().map(|&(_, i)| i).sum();
        assert!((sum - 200.0).abs() < 2.0, "sum={sum}");
        let current_of = |id: usize| result.currents_a.iter().find(|&&(i, _)| i == id).unwrap().1;
        assert!(current_of(0) > current_of(1));
        assert!(current_of(1) > current_of(2));
    }

    #[test]
    fn equalization_currents_sum_to_near_zero_and_favor_low_ocv() {
        let packs = vec![
            pack(0, 790.0, 0.1, 200.0),
            pack(1, 800.0, 0.1, 200.0),
            pack(2, 810.0, 0.1, 200.0),
        ];
        let result = solve(&packs, 0.0, 600.0, 600.0, 1.01, 0.01).unwrap();
        let sum: f64 = result.currents_a.iter().map(|&(_, i)| i).sum();
        assert!(sum.abs() < 0.5, "sum={sum}");
        let current_of = |id: usize| result.currents_a.iter().find(|&&(i, _)| i == id).unwrap().1;
        assert!(current_of(0) > 0.0, "lowest OCV pack should charge");
        assert!(current_of(2) < 0.0, "highest OCV pack should discharge");
        assert!(current_of(1).abs() < current_of(0).abs());
        assert!(current_of(1).abs() < current_of(2).abs());
    }

    #[test]
    fn clamped_pack_never_exceeds_its_limit_by_more_than_reclamp_margin() {
        let packs = vec![pack(0, 700.0, 0.05, 50.0), pack(1, 900.0, 0.05, 500.0)];
        let result = solve(&packs, 400.0, 550.0, 550.0, 1.01, 0.01).unwrap();
        for (id, current) in &result.currents_a {
            let p = packs.iter().find(|p| p.id == *id).unwrap();
            let limit = if *current >= 0.0 {
                p.charge_limit_a
            } else {
                p.discharge_limit_a
            };
            assert!(current.abs() <= limit * 1.01 + 1e-6);
        }
    }

    #[test]
    fn empty_pack_set_returns_none() {
        assert!(solve(&[], 100.0, 0.0, 0.0, 1.01, 0.01).is_none());
    }

    #[test]
    fn requested_current_clamped_to_array_limit_before_solving() {
        let packs = vec![pack(0, 800.0, 0.1, 500.0), pack(1, 800.0, 0.1, 500.0)];
        let result = solve(&packs, 10_000.0, 300.0, 300.0, 1.01, 0.01).unwrap();
        let sum: f64 = result.currents_a.iter().map(|&(_, i)| i).sum();
        assert!(sum <= 300.0 * 1.02);
    }
}
