//! Compile-time configuration (spec.md §6), carried as a value struct
//! (spec.md §9 Design Note: "Preprocessor-gated code paths → configuration
//! struct").

/// All voltages in millivolts, currents in milliamps, powers in milliwatts
/// unless noted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegulatorControllerConfig {
    /// Gates whether the UVP-recovery precharge step (§4.5 step 4) runs at
    /// all.
    pub attempt_uvp_recovery: bool,
    /// Carried for parity with the compile-time configuration surface
    /// (§6); the source counter built on this flag is incremented but
    /// never read (spec.md §9 Design Note (d)), so nothing in this crate
    /// consumes it.
    pub continuous_uvp_recovery: bool,
    /// Carried for parity with §6; this core always infers cell count
    /// dynamically from the Battery Monitor's ladder probe rather than
    /// charging to a fixed setpoint, so these three are unconsumed.
    pub fixed_voltage_charging: bool,
    pub fixed_voltage_setpoint_mv: u16,
    pub fixed_voltage_precharge_mv: u16,
    /// Carried for parity with §6; unconsumed for the same reason as
    /// `fixed_voltage_charging`.
    pub num_series: u8,

    pub n_uvp_attempts: u16,
    pub v_cell_uvp_recover_mv: u16,
    pub uvp_recovery_current_ma: u16,

    pub max_charging_power_mw: u32,
    pub max_charge_current_ma: u16,
    pub assume_efficiency: f32,
    pub t_throttle_c: i16,
    pub charge_term_current_ma: u16,
    pub battery_disconnect_threshold_mv_per_cell: u16,
}

impl Default for RegulatorControllerConfig {
    fn default() -> Self {
        Self {
            attempt_uvp_recovery: true,
            continuous_uvp_recovery: false,
            fixed_voltage_charging: false,
            fixed_voltage_setpoint_mv: 12_592,
            fixed_voltage_precharge_mv: 11_100,
            num_series: 3,

            n_uvp_attempts: 300,
            v_cell_uvp_recover_mv: 3_000,
            uvp_recovery_current_ma: 128,

            max_charging_power_mw: 65_000,
            max_charge_current_ma: 5_000,
            assume_efficiency: 0.9,
            t_throttle_c: 20,
            charge_term_current_ma: 200,
            battery_disconnect_threshold_mv_per_cell: 4_300,
        }
    }
}
