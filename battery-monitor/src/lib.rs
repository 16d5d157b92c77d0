//! Battery Monitor loop (spec.md §4.4): pack connectivity detection,
//! cell-count inference, thermal and cell safety checks, and the balancing
//! controller.
#![no_std]

mod config;
mod state;
mod step;

pub use config::BatteryMonitorConfig;
pub use state::BatteryState;
pub use step::{BatteryMonitor, MonitorInputs, MonitorOutcome};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, Ticker};
use fault_registry::FaultRegistry;

/// Everything the Battery Monitor loop needs from the surrounding firmware
/// to gather one [`MonitorInputs`] sample and to drive the per-cell
/// discharge resistors it decides on. Implemented by board setup code; see
/// spec.md §6.
pub trait AnalogSampler {
    type Error;

    async fn pack_voltage_mv(&mut self) -> Result<u16, Self::Error>;
    async fn cell_voltage_mv(&mut self, cell: usize) -> Result<u16, Self::Error>;
    async fn tap_voltage_2s_mv(&mut self) -> Result<u16, Self::Error>;
    async fn tap_voltage_3s_mv(&mut self) -> Result<u16, Self::Error>;
    async fn tap_voltage_4s_mv(&mut self) -> Result<u16, Self::Error>;
    async fn controller_temperature_c(&mut self) -> Result<i16, Self::Error>;

    async fn set_cell_discharge(&mut self, cell: usize, engage: bool) -> Result<(), Self::Error>;
}

const MONITOR_PERIOD: Duration = Duration::from_millis(250);

async fn gather<S: AnalogSampler>(sampler: &mut S) -> Result<MonitorInputs, S::Error> {
    let pack_voltage_mv = sampler.pack_voltage_mv().await?;
    let mut cell_voltage_mv = [0u16; 4];
    for (cell, slot) in cell_voltage_mv.iter_mut().enumerate() {
        *slot = sampler.cell_voltage_mv(cell).await?;
    }
    Ok(MonitorInputs {
        pack_voltage_mv,
        cell_voltage_mv,
        tap_2s_mv: sampler.tap_voltage_2s_mv().await?,
        tap_3s_mv: sampler.tap_voltage_3s_mv().await?,
        tap_4s_mv: sampler.tap_voltage_4s_mv().await?,
        controller_temperature_c: sampler.controller_temperature_c().await?,
    })
}

/// Runs the Battery Monitor loop forever on a 250ms tick, publishing its
/// [`BatteryState`] into `published` for the Regulator Controller loop to
/// read. Grounded on the teacher's `monitor_task_fg` shape: no
/// cancellation, one `Ticker`-paced loop for the lifetime of the firmware.
pub async fn run<M, S>(
    mut sampler: S,
    config: BatteryMonitorConfig,
    faults: &FaultRegistry,
    published: &Mutex<M, BatteryState>,
) -> !
where
    M: RawMutex,
    S: AnalogSampler,
{
    let mut monitor = BatteryMonitor::new(config, faults);
    let mut ticker = Ticker::every(MONITOR_PERIOD);
    loop {
        match gather(&mut sampler).await {
            Ok(inputs) => {
                let outcome = monitor.step(inputs);
                for (cell, engage) in outcome.cell_discharge.into_iter().enumerate() {
                    if sampler.set_cell_discharge(cell, engage).await.is_err() {
                        logger::error!("failed to drive cell discharge resistor");
                    }
                }
                *published.lock().await = monitor.state();
            }
            Err(_) => {
                logger::error!("analog sampler read failed");
            }
        }
        ticker.next().await;
    }
}
