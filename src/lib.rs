//! Core control loops for a multi-cell Li-ion buck-boost charger (a
//! BQ25703A-class regulator driven over a two-wire serial bus).
//!
//! This crate wires together the five leaf crates that implement the two
//! periodic actors (`battery-monitor` and `regulator-controller`) against a
//! shared [`fault_registry::FaultRegistry`] and a shared battery-state
//! mailbox, and re-exports the collaborator traits the surrounding firmware
//! must implement (§6: `bus`, `analog_sampler`, `usbpd`; `gpio` is plain
//! `embedded-hal` pins, not a trait).
#![no_std]

pub mod timeout;

/// Collaborator traits the surrounding firmware implements. Each trait is
/// defined in its sole consuming crate (the dependency graph runs root →
/// leaf crates, not the reverse) and re-exported here so the external API
/// matches how the system overview frames it.
pub mod collaborators {
    pub use battery_monitor::AnalogSampler;
    pub use regulator_controller::{InputPowerReady, UsbPd};
    pub use regulator_driver::Bus;
}

pub use battery_monitor::{BatteryMonitor, BatteryMonitorConfig, BatteryState, MonitorInputs, MonitorOutcome};
pub use fault_registry::{Fault, FaultRegistry};
pub use regulator_codec as codec;
pub use regulator_controller::{
    InputPowerReady, RegulatorController, RegulatorControllerConfig, RegulatorState, UsbPd,
};
pub use regulator_driver::{
    Bus, BusLease, BusTransportError, ChargeStatus, Connected, ReceiveResult, RegulatorDriver,
    TransmitResult,
};

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::mutex::Mutex;
use embedded_hal::digital::{InputPin, OutputPin};

/// Compile-time configuration for the whole firmware (spec.md §6, §9
/// Design Note): composes the two leaf-crate config structs supplied at
/// initialization, one value per owning loop.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChargerConfig {
    pub battery_monitor: BatteryMonitorConfig,
    pub regulator_controller: RegulatorControllerConfig,
}

/// The mailbox the Battery Monitor loop publishes into and the Regulator
/// Controller loop reads from every tick (spec.md §5 "Cross-task reads").
pub type SharedBatteryState = Mutex<NoopRawMutex, BatteryState>;

pub const fn new_shared_battery_state() -> SharedBatteryState {
    Mutex::new(BatteryState {
        xt60_connected: false,
        balance_port_connected: false,
        number_of_cells: 0,
        balancing_enabled: false,
        cell_balance_bitmask: 0,
        cell_over_voltage: false,
        requires_charging: false,
        controller_temperature_c: 0,
    })
}

/// Runs both control loops forever. Spawns nothing itself — the caller's
/// executor owns the two futures (see the teacher's `board/drivers` task
/// spawn sites for the pattern this follows); this just drives them
/// concurrently to completion, which for these two loops means forever.
#[allow(clippy::too_many_arguments)]
pub async fn run<S, B, HIZ, OTG, FAN, CHRG, U>(
    sampler: S,
    driver: RegulatorDriver<'_, B, HIZ, OTG, FAN>,
    chrg_ok: CHRG,
    usbpd: U,
    config: ChargerConfig,
    faults: &FaultRegistry,
    battery_state: &SharedBatteryState,
) -> !
where
    S: battery_monitor::AnalogSampler,
    B: regulator_driver::Bus,
    HIZ: OutputPin,
    OTG: OutputPin,
    FAN: OutputPin,
    CHRG: InputPin,
    U: regulator_controller::UsbPd,
{
    let monitor = battery_monitor::run(sampler, config.battery_monitor, faults, battery_state);
    let controller = regulator_controller::run(
        driver,
        chrg_ok,
        usbpd,
        config.regulator_controller,
        faults,
        battery_state,
    );

    match embassy_futures::select::select(monitor, controller).await {
        embassy_futures::select::Either::First(never) => never,
        embassy_futures::select::Either::Second(never) => never,
    }
}
