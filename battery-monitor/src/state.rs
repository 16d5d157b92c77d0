//! Battery state (spec.md §3), owned by [`crate::BatteryMonitor`] and
//! published to the Regulator Controller loop as by-value snapshots.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatteryState {
    pub xt60_connected: bool,
    pub balance_port_connected: bool,
    /// 0, 2, 3, or 4. 0 means no pack or an invalid ladder.
    pub number_of_cells: u8,
    pub balancing_enabled: bool,
    /// One bit per cell, bit *i* set iff cell *i*'s discharge resistor is
    /// engaged.
    pub cell_balance_bitmask: u8,
    pub cell_over_voltage: bool,
    pub requires_charging: bool,
    /// Last-sampled controller temperature. Published alongside the rest of
    /// this state so the Regulator Controller's thermal derate (spec.md
    /// §4.5 step 5b) can read it without its own temperature collaborator.
    pub controller_temperature_c: i16,
}

impl BatteryState {
    pub fn cell_discharge_engaged(&self, cell: usize) -> bool {
        self.cell_balance_bitmask & (1 << cell) != 0
    }
}
