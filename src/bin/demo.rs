//! Scripted demonstration scenario driving the control core through a
//! sequential-then-parallel connect, a charge request, and an
//! equalization tick. External collaborator: no CSV or plotting here,
//! only structured log output (core Non-goals, §1).

use std::collections::HashMap;

use ess_core::{ArrayController, Config, EquivalentCircuitPlant, PackController, PackMode};

fn log_tick(array: &ArrayController<EquivalentCircuitPlant>, time_s: f64) {
    let record = array.telemetry_record(time_s);
    for sample in &record.packs {
        log::info!(
            "t={:>5.1}s mode={:?} soc={:.3} cell_v={:.3} current_a={:.1} charge_a={:.1} discharge_a={:.1}",
            record.time_s,
            sample.mode,
            sample.soc,
            sample.cell_voltage_v,
            sample.current_a,
            sample.charge_limit_a,
            sample.discharge_limit_a,
        );
    }
    log::info!(
        "t={:>5.1}s bus_v={:.1} array_charge_a={:.1} array_discharge_a={:.1}",
        record.time_s,
        record.bus_voltage_v,
        record.array_charge_limit_a,
        record.array_discharge_limit_a,
    );
    match serde_json::to_string(&record) {
        Ok(json) => log::debug!("{json}"),
        Err(e) => log::warn!("failed to encode telemetry record: {e}"),
    }
}

fn main() {
    env_logger::init();

    let socs = [0.45, 0.55, 0.65];
    let packs: Vec<PackController<EquivalentCircuitPlant>> = socs
        .iter()
        .enumerate()
        .map(|(id, &soc)| {
            let plant = EquivalentCircuitPlant::new(22, 14, 280.0, soc, 40.0, 40.0);
            PackController::new(id, plant, Config::default())
        })
        .collect();

    let mut array = ArrayController::new(packs, 0.01, 1.01).expect("demo array is non-empty");

    array.update_bus_voltage();
    let heat = HashMap::new();
    let mut time_s = 0.0;

    log::info!("connecting pack 1 of 3 (charge intent)");
    array.connect_first(true);
    for _ in 0..5 {
        array.step(1.0, 0.0, &heat);
        time_s += 1.0;
        log_tick(&array, time_s);
    }

    log::info!("connecting remaining packs");
    array.connect_remaining(true);
    for _ in 0..5 {
        array.step(1.0, 0.0, &heat);
        time_s += 1.0;
        log_tick(&array, time_s);
    }

    log::info!("requesting 200 A charge across the array");
    for _ in 0..5 {
        array.step(1.0, 200.0, &heat);
        time_s += 1.0;
        log_tick(&array, time_s);
    }

    log::info!("dropping to zero load: expect equalization currents");
    for _ in 0..5 {
        array.step(1.0, 0.0, &heat);
        time_s += 1.0;
        log_tick(&array, time_s);
    }

    let all_connected = array.packs().iter().all(|p| p.mode() == PackMode::Connected);
    log::info!("demo complete; all packs connected = {all_connected}");
}
