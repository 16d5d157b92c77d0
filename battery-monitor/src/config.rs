//! Compile-time configuration (spec.md §6), carried as a value struct
//! (spec.md §9 Design Note: "Preprocessor-gated code paths → configuration
//! struct").

/// All voltages in millivolts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryMonitorConfig {
    pub enable_balancing: bool,
    pub v_connected_mv: u16,
    pub t_max_op_c: i16,
    pub t_recover_c: i16,
    pub v_cell_uv_hard_mv: u16,
    pub v_cell_ov_hard_mv: u16,
    pub v_cell_ov_discharge_mv: u16,
    pub v_cell_charge_enable_mv: u16,
    pub v_cell_min_balance_mv: u16,
    pub cell_balancing_scalar_max: f32,
    pub cell_delta_v_enable_mv: u16,
    pub cell_balancing_hysteresis_mv: u16,
}

impl Default for BatteryMonitorConfig {
    fn default() -> Self {
        Self {
            enable_balancing: true,
            v_connected_mv: 2_500,
            t_max_op_c: 60,
            t_recover_c: 50,
            v_cell_uv_hard_mv: 2_500,
            v_cell_ov_hard_mv: 4_200,
            v_cell_ov_discharge_mv: 4_200,
            v_cell_charge_enable_mv: 4_100,
            v_cell_min_balance_mv: 3_000,
            cell_balancing_scalar_max: 8.0,
            cell_delta_v_enable_mv: 50,
            cell_balancing_hysteresis_mv: 20,
        }
    }
}
