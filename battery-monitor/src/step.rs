//! Pure periodic step (spec.md §4.4). No bus, no executor — testable with
//! plain `#[test]` functions.

use fault_registry::{Fault, FaultRegistry};

use crate::config::BatteryMonitorConfig;
use crate::state::BatteryState;

/// Sampled values for one iteration, gathered from the `AnalogSampler`
/// collaborator. Tap voltage for cell index 0 has no separate source (the
/// ladder has nothing below the first cell), so the per-cell reading
/// doubles as its own tap reading.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MonitorInputs {
    pub pack_voltage_mv: u16,
    pub cell_voltage_mv: [u16; 4],
    pub tap_2s_mv: u16,
    pub tap_3s_mv: u16,
    pub tap_4s_mv: u16,
    pub controller_temperature_c: i16,
}

/// What the task wrapper does with the result of a step: which discharge
/// resistors to drive. `BatteryState::cell_balance_bitmask` carries the same
/// information; this is the decoded, pin-ready form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorOutcome {
    pub cell_discharge: [bool; 4],
}

/// Owns [`BatteryState`] and steps it once per tick against a shared
/// [`FaultRegistry`].
pub struct BatteryMonitor<'a> {
    pub state: BatteryState,
    pub config: BatteryMonitorConfig,
    faults: &'a FaultRegistry,
}

impl<'a> BatteryMonitor<'a> {
    pub fn new(config: BatteryMonitorConfig, faults: &'a FaultRegistry) -> Self {
        Self {
            state: BatteryState::default(),
            config,
            faults,
        }
    }

    pub fn state(&self) -> BatteryState {
        self.state
    }

    pub fn step(&mut self, inputs: MonitorInputs) -> MonitorOutcome {
        self.state.controller_temperature_c = inputs.controller_temperature_c;

        // 1. XT60 detect.
        self.state.xt60_connected = inputs.pack_voltage_mv > self.config.v_connected_mv;

        // 2. Ladder probe.
        let tap_mv = [
            inputs.cell_voltage_mv[0],
            inputs.tap_2s_mv,
            inputs.tap_3s_mv,
            inputs.tap_4s_mv,
        ];
        let mut ladder: u8 = 0;
        for k in 0..4u8 {
            let i = k as usize;
            if tap_mv[i] > self.config.v_connected_mv
                && inputs.cell_voltage_mv[i] > self.config.v_connected_mv
            {
                ladder |= 1u8 << k;
            }
        }

        // 3. Cell count inference: highest bit set determines the
        // candidate; accepted only if every lower bit is also set.
        let candidate: u8 = if ladder & 0b1000 != 0 {
            4
        } else if ladder & 0b0100 != 0 {
            3
        } else if ladder & 0b0010 != 0 {
            2
        } else {
            0
        };
        let contiguous = candidate > 0 && (0..candidate).all(|k| ladder & (1u8 << k) != 0);

        if contiguous {
            self.state.number_of_cells = candidate;
            self.faults.clear(Fault::CellConnectionError);
        } else {
            self.state.number_of_cells = 0;
            self.faults.set(Fault::CellConnectionError);
        }
        self.state.balance_port_connected = self.state.number_of_cells > 1;

        // 4. Controller-temperature check: one-sided hysteresis, the fault
        // registry itself is the latch.
        if inputs.controller_temperature_c > self.config.t_max_op_c {
            self.faults.set(Fault::ControllerOverTemperature);
        } else if inputs.controller_temperature_c < self.config.t_recover_c {
            self.faults.clear(Fault::ControllerOverTemperature);
        }

        // 5. Cell safety check.
        let active_cells = self.state.number_of_cells as usize;
        let active = &inputs.cell_voltage_mv[..active_cells.min(4)];
        if active.iter().any(|&v| v < self.config.v_cell_uv_hard_mv) {
            self.faults.set(Fault::CellVoltageError);
        } else {
            self.faults.clear(Fault::CellVoltageError);
        }
        self.state.cell_over_voltage = active.iter().any(|&v| v > self.config.v_cell_ov_hard_mv);

        // 6. Balancing.
        let outcome = self.balance(&inputs, active_cells);

        // 7. Requires-charging.
        self.state.requires_charging = self.state.xt60_connected
            && self.state.balance_port_connected
            && (inputs.pack_voltage_mv as u32)
                < self.state.number_of_cells as u32 * self.config.v_cell_charge_enable_mv as u32;

        outcome
    }

    fn balance(&mut self, inputs: &MonitorInputs, active_cells: usize) -> MonitorOutcome {
        let cfg = self.config;
        let gated =
            cfg.enable_balancing && self.state.balance_port_connected && !self.faults.any();

        if gated && active_cells > 0 {
            let active = &inputs.cell_voltage_mv[..active_cells];
            let vmin = *active.iter().min().unwrap();
            let vmax = *active.iter().max().unwrap();

            let scalar = if self.state.xt60_connected {
                let span = cfg.v_cell_charge_enable_mv as f32 - cfg.v_cell_min_balance_mv as f32;
                let frac = (vmax as f32 - cfg.v_cell_min_balance_mv as f32) / span;
                (cfg.cell_balancing_scalar_max * (1.0 - frac)).max(1.0)
            } else {
                1.0
            };

            let delta_mv = (vmax - vmin) as f32;
            let enable_threshold = cfg.cell_delta_v_enable_mv as f32 * scalar;
            let hysteresis_threshold = cfg.cell_balancing_hysteresis_mv as f32 * scalar;

            if !self.state.balancing_enabled {
                if delta_mv >= enable_threshold && vmin > cfg.v_cell_min_balance_mv {
                    self.state.balancing_enabled = true;
                }
            } else if delta_mv < hysteresis_threshold || vmin <= cfg.v_cell_min_balance_mv {
                self.state.balancing_enabled = false;
            }

            let mut bitmask = 0u8;
            for k in 0..active_cells {
                let v = inputs.cell_voltage_mv[k];
                let over_discharge = v >= cfg.v_cell_ov_discharge_mv;
                let balancing_discharge =
                    self.state.balancing_enabled && (v as f32 - vmin as f32) >= hysteresis_threshold;
                if over_discharge || balancing_discharge {
                    bitmask |= 1u8 << k;
                }
            }
            self.state.cell_balance_bitmask = bitmask;
        } else {
            self.state.balancing_enabled = false;
            // Over-voltage discharge still applies regardless of the
            // balancing-enabled state (spec.md §4.4).
            let mut bitmask = 0u8;
            for k in 0..active_cells {
                if inputs.cell_voltage_mv[k] >= cfg.v_cell_ov_discharge_mv {
                    bitmask |= 1u8 << k;
                }
            }
            self.state.cell_balance_bitmask = bitmask;
        }

        let mut outcome = MonitorOutcome::default();
        for (k, slot) in outcome.cell_discharge.iter_mut().enumerate() {
            *slot = self.state.cell_discharge_engaged(k);
        }
        outcome
    }
}
