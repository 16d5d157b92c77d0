//! Regulator Controller loop (spec.md §4.5): charge envelope, UVP-recovery
//! precharge, thermal derate, spurious-disconnect probe, and charge
//! termination.
#![no_std]

mod config;
mod state;
mod step;

pub use config::RegulatorControllerConfig;
pub use state::RegulatorState;
pub use step::{
    charge_current_ma, charge_power_mw, thermal_scalar, InputPowerReady, RegulatorController,
    UsbPd, CONTROL_PERIOD,
};

use battery_monitor::BatteryState;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::Ticker;
use embedded_hal::digital::{InputPin, OutputPin};
use fault_registry::FaultRegistry;
use regulator_driver::{Bus, RegulatorDriver};

/// Runs the Regulator Controller loop forever on a 250ms tick: startup
/// probe once, then `step()` every tick, reading the Battery Monitor's
/// published state each time. Grounded on the same `monitor_task_fg`
/// shape `battery-monitor::run` uses: no cancellation, one `Ticker`-paced
/// loop for the lifetime of the firmware.
#[allow(clippy::too_many_arguments)]
pub async fn run<M, B, HIZ, OTG, FAN, CHRG, U>(
    mut driver: RegulatorDriver<'_, B, HIZ, OTG, FAN>,
    mut chrg_ok: CHRG,
    mut usbpd: U,
    config: RegulatorControllerConfig,
    faults: &FaultRegistry,
    battery_state: &Mutex<M, BatteryState>,
) -> !
where
    M: RawMutex,
    B: Bus,
    HIZ: OutputPin,
    OTG: OutputPin,
    FAN: OutputPin,
    CHRG: InputPin,
    U: UsbPd,
{
    let mut controller = RegulatorController::new(config, faults);
    controller.startup(&mut driver).await;

    let mut ticker = Ticker::every(CONTROL_PERIOD);
    loop {
        let battery = *battery_state.lock().await;
        controller
            .step(&mut driver, &mut chrg_ok, &mut usbpd, battery)
            .await;
        ticker.next().await;
    }
}
