//! Periodic control step (spec.md §4.5): input power gating, bus liveness,
//! status & ADC harvest, bounded UVP-recovery precharge, and the main
//! charge-envelope/thermal-derate/termination control step.

use battery_monitor::BatteryState;
use embassy_time::{Duration, Timer};
use embedded_hal::digital::{InputPin, OutputPin};
use fault_registry::{Fault, FaultRegistry};
use regulator_codec::current::CHARGE_CURRENT_CEILING_MA;
use regulator_driver::{Bus, Connected, RegulatorDriver};

use crate::config::RegulatorControllerConfig;
use crate::state::RegulatorState;

/// The control loop's own tick period; also what spec.md §4.5's "cooperative
/// tick" means inside the UVP-recovery inner loop (see DESIGN.md for why
/// this isn't a separate 500 ms timer).
pub const CONTROL_PERIOD: Duration = Duration::from_millis(250);

/// The USB-PD collaborator (spec.md §6). PD negotiation itself is out of
/// scope; this is just the read side the core consumes.
pub trait UsbPd {
    async fn input_power_ready(&mut self) -> InputPowerReady;
    async fn max_input_current_a(&mut self) -> f32;
    async fn max_input_power_mw(&mut self) -> u32;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputPowerReady {
    Ready,
    NotReady,
    NoPdSupply,
}

/// `s = 1 − (0.0333·T − 1.66)`, clamped to `[0, 1]` (spec.md §4.5 step 5b,
/// invariant 6).
pub fn thermal_scalar(temp_c: i16) -> f32 {
    let s = 1.0 - (0.0333 * temp_c as f32 - 1.66);
    s.clamp(0.0, 1.0)
}

/// Charge power envelope in mW. `vbus_mv * amps` is already mW (mV·A =
/// 1e-3 V·A = 1e-3 W); no further unit conversion needed.
pub fn charge_power_mw(
    vbus_mv: u16,
    max_input_current_a: f32,
    pd_max_input_power_mw: u32,
    temp_c: i16,
    config: &RegulatorControllerConfig,
) -> f32 {
    let mut p = vbus_mv as f32 * max_input_current_a * config.assume_efficiency;
    p = p.min(config.max_charging_power_mw as f32);
    if p > pd_max_input_power_mw as f32 {
        p = pd_max_input_power_mw as f32 * config.assume_efficiency;
    }
    if temp_c > config.t_throttle_c {
        p *= thermal_scalar(temp_c);
    }
    p.max(0.0)
}

/// `I_chg_ma = P_mw * 1000 / V_pack_mv`, clamped to `ceiling_ma`.
pub fn charge_current_ma(power_mw: f32, pack_voltage_mv: u16, ceiling_ma: u16) -> u16 {
    if pack_voltage_mv == 0 {
        return 0;
    }
    let ma = (power_mw * 1_000.0 / pack_voltage_mv as f32).max(0.0);
    (ma as u16).min(ceiling_ma)
}

/// `VBAT` recovery threshold for UVP precharge: `number_of_cells * v_cell_uvp_recover_mv`.
fn uvp_threshold_mv(number_of_cells: u8, v_cell_uvp_recover_mv: u16) -> u32 {
    number_of_cells as u32 * v_cell_uvp_recover_mv as u32
}

/// Tick budget for one UVP-recovery attempt: 20 ticks on the first attempt,
/// 12 on every subsequent one (spec.md §4.5 step 4).
fn uvp_tick_budget(first_attempt: bool) -> u8 {
    if first_attempt {
        20
    } else {
        12
    }
}

/// Owns [`RegulatorState`] and the termination counter; steps once per
/// 250 ms tick against a shared [`FaultRegistry`].
pub struct RegulatorController<'a> {
    pub state: RegulatorState,
    config: RegulatorControllerConfig,
    faults: &'a FaultRegistry,
    termination_counter: u8,
}

impl<'a> RegulatorController<'a> {
    pub fn new(config: RegulatorControllerConfig, faults: &'a FaultRegistry) -> Self {
        Self {
            state: RegulatorState::default(),
            config,
            faults,
            termination_counter: 0,
        }
    }

    pub fn state(&self) -> RegulatorState {
        self.state
    }

    /// Startup sequence (spec.md §4.5 Startup): output high-impedance, OTG
    /// off, identify probe, fixed ChargeOption0, ADC configuration, one
    /// settle tick.
    pub async fn startup<B, HIZ, OTG, FAN>(&mut self, driver: &mut RegulatorDriver<'_, B, HIZ, OTG, FAN>)
    where
        B: Bus,
        HIZ: OutputPin,
        OTG: OutputPin,
        FAN: OutputPin,
    {
        driver.hi_z(true);
        self.state.hi_z = true;
        driver.otg(false);

        let connected = driver.identify().await;
        self.apply_identify(connected);

        let _ = driver.write_charge_option_0().await;
        let _ = driver.configure_adc().await;
        Timer::after(CONTROL_PERIOD).await;
    }

    fn apply_identify(&mut self, connected: Connected) {
        match connected {
            Connected::Connected => {
                self.state.connected = true;
                self.faults.clear(Fault::RegulatorCommunicationError);
            }
            Connected::NotConnected => {
                self.state.connected = false;
                self.faults.set(Fault::RegulatorCommunicationError);
            }
        }
    }

    pub async fn step<B, HIZ, OTG, FAN, CHRG, U>(
        &mut self,
        driver: &mut RegulatorDriver<'_, B, HIZ, OTG, FAN>,
        chrg_ok: &mut CHRG,
        usbpd: &mut U,
        battery: BatteryState,
    ) where
        B: Bus,
        HIZ: OutputPin,
        OTG: OutputPin,
        FAN: OutputPin,
        CHRG: InputPin,
        U: UsbPd,
    {
        // 1. Input power gating.
        let input_power_ok = chrg_ok.is_high().unwrap_or(false);
        if !input_power_ok {
            self.faults.set(Fault::VoltageInputError);
        } else {
            self.faults.clear(Fault::VoltageInputError);
        }

        // 2. Bus liveness.
        if self.faults.has(Fault::RegulatorCommunicationError) {
            self.state.connected = false;
        }

        // 3. Status & samples.
        self.refresh_status_and_samples(driver).await;

        // 4. UVP recovery (boot-time, bounded).
        if self.config.attempt_uvp_recovery {
            self.uvp_recovery(driver, battery.number_of_cells).await;
        }

        // 5. Main control step.
        self.main_control(driver, usbpd, battery, input_power_ok).await;
    }

    async fn refresh_status_and_samples<B, HIZ, OTG, FAN>(
        &mut self,
        driver: &mut RegulatorDriver<'_, B, HIZ, OTG, FAN>,
    ) where
        B: Bus,
        HIZ: OutputPin,
        OTG: OutputPin,
        FAN: OutputPin,
    {
        match driver.charge_status().await {
            Ok(status) => {
                self.state.charging_status = status.charging_active;
                self.faults.clear(Fault::RegulatorCommunicationError);
                self.state.connected = true;
            }
            Err(_) => {
                self.faults.set(Fault::RegulatorCommunicationError);
                self.state.connected = false;
            }
        }

        match driver.sample_adc().await {
            Ok(sample) => {
                self.state.vbus_mv = sample.vbus_mv;
                self.state.vbat_mv = sample.vbat_mv;
                self.state.vsys_mv = sample.vsys_mv;
                self.state.charge_current_ma = sample.ichg_ma;
                self.state.input_current_ma = sample.iin_ma;
                self.faults.clear(Fault::RegulatorCommunicationError);
                self.state.connected = true;
            }
            Err(_) => {
                self.faults.set(Fault::RegulatorCommunicationError);
                self.state.connected = false;
            }
        }
    }

    /// Bounded UVP-recovery precharge. A no-op unless `VBAT` is currently
    /// below the recovery threshold for the known cell count.
    async fn uvp_recovery<B, HIZ, OTG, FAN>(
        &mut self,
        driver: &mut RegulatorDriver<'_, B, HIZ, OTG, FAN>,
        number_of_cells: u8,
    ) where
        B: Bus,
        HIZ: OutputPin,
        OTG: OutputPin,
        FAN: OutputPin,
    {
        if number_of_cells == 0 {
            return;
        }
        let threshold = uvp_threshold_mv(number_of_cells, self.config.v_cell_uvp_recover_mv);
        if (self.state.vbat_mv as u32) >= threshold {
            return;
        }

        let mut attempts = self.config.n_uvp_attempts;
        let mut first_attempt = true;

        while (self.state.vbat_mv as u32) < threshold && attempts > 0 {
            self.state.precharging = true;
            let k = uvp_tick_budget(first_attempt);
            first_attempt = false;

            for _ in 0..k {
                let _ = driver.set_charge_voltage(number_of_cells).await;
                let _ = driver.set_charge_current(self.config.uvp_recovery_current_ma).await;
                driver.hi_z(false);
                self.state.hi_z = false;
                self.refresh_status_and_samples(driver).await;
                Timer::after(CONTROL_PERIOD).await;
            }
            attempts -= 1;
        }

        self.state.precharging = false;
        driver.hi_z(true);
        self.state.hi_z = true;
        for _ in 0..4 {
            self.refresh_status_and_samples(driver).await;
            Timer::after(CONTROL_PERIOD).await;
        }
    }

    async fn main_control<B, HIZ, OTG, FAN, U>(
        &mut self,
        driver: &mut RegulatorDriver<'_, B, HIZ, OTG, FAN>,
        usbpd: &mut U,
        battery: BatteryState,
        input_power_ok: bool,
    ) where
        B: Bus,
        HIZ: OutputPin,
        OTG: OutputPin,
        FAN: OutputPin,
        U: UsbPd,
    {
        let preconditions = battery.xt60_connected
            && battery.balance_port_connected
            && !self.faults.any()
            && input_power_ok
            && !battery.cell_over_voltage;

        if !preconditions {
            driver.hi_z(true);
            self.state.hi_z = true;
            let _ = driver.set_charge_voltage(0).await;
            let _ = driver.set_charge_current(0).await;
            self.state.max_charge_current_ma = 0;
            self.termination_counter = 0;
            return;
        }

        // a. Set charge voltage for the current cell count.
        let _ = driver.set_charge_voltage(battery.number_of_cells).await;

        // b. Compute charge power envelope.
        let ready = matches!(usbpd.input_power_ready().await, InputPowerReady::Ready);
        if !ready {
            driver.hi_z(true);
            self.state.hi_z = true;
            let _ = driver.set_charge_current(0).await;
            self.state.max_charge_current_ma = 0;
            return;
        }

        let max_input_current_a = usbpd.max_input_current_a().await;
        let pd_max_power_mw = usbpd.max_input_power_mw().await;
        let power_mw = charge_power_mw(
            self.state.vbus_mv,
            max_input_current_a,
            pd_max_power_mw,
            battery.controller_temperature_c,
            &self.config,
        );

        // c. Convert to current.
        let ceiling = self.config.max_charge_current_ma.min(CHARGE_CURRENT_CEILING_MA);
        let current_ma = charge_current_ma(power_mw, self.state.vbat_mv, ceiling);
        let _ = driver.set_charge_current(current_ma).await;
        self.state.max_charge_current_ma = current_ma;

        // d. Clear high-impedance (enable output).
        driver.hi_z(false);
        self.state.hi_z = false;

        // e. Spurious-disconnect probe.
        let disconnect_threshold_mv =
            self.config.battery_disconnect_threshold_mv_per_cell as u32 * battery.number_of_cells as u32;
        if (self.state.vbat_mv as u32) > disconnect_threshold_mv {
            driver.hi_z(true);
            self.state.hi_z = true;
            for _ in 0..2 {
                Timer::after(CONTROL_PERIOD).await;
            }
            driver.hi_z(false);
            self.state.hi_z = false;
        }

        // f. Termination.
        if !battery.requires_charging && self.state.charge_current_ma < self.config.charge_term_current_ma {
            self.termination_counter = self.termination_counter.saturating_add(1);
            if self.termination_counter > 3 {
                driver.hi_z(true);
                self.state.hi_z = true;
            }
        } else {
            self.termination_counter = 0;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn thermal_scalar_matches_literal_scenario_values() {
        assert_eq!(thermal_scalar(20), 1.0);
        assert_eq!(thermal_scalar(35), 1.0);
        assert_eq!(thermal_scalar(45), 1.0);
        assert!((thermal_scalar(55) - 0.828).abs() < 0.001);
        assert_eq!(thermal_scalar(80), 0.0);
    }

    #[test]
    fn s1_nominal_envelope_matches_literal_scenario() {
        let config = RegulatorControllerConfig::default();
        let power = charge_power_mw(20_000, 3.0, 60_000, 25, &config);
        assert!((power - 54_000.0).abs() < 1.0);
        let current = charge_current_ma(power, 10_800, config.max_charge_current_ma);
        assert_eq!(current, 5_000);
    }

    #[test]
    fn power_clamped_to_pd_advertised_limit() {
        let config = RegulatorControllerConfig::default();
        // PD only advertises 15 W even though VBUS*Imax*eta would be higher.
        let power = charge_power_mw(20_000, 3.0, 15_000, 25, &config);
        assert!((power - 15_000.0 * config.assume_efficiency).abs() < 1.0);
    }

    #[test]
    fn power_is_zero_at_high_temperature() {
        let config = RegulatorControllerConfig::default();
        let power = charge_power_mw(20_000, 3.0, 60_000, 80, &config);
        assert_eq!(power, 0.0);
    }

    #[test]
    fn uvp_threshold_scales_with_cell_count() {
        assert_eq!(uvp_threshold_mv(3, 3_000), 9_000);
        assert_eq!(uvp_threshold_mv(4, 3_000), 12_000);
    }

    #[test]
    fn uvp_tick_budget_is_longer_on_first_attempt() {
        assert_eq!(uvp_tick_budget(true), 20);
        assert_eq!(uvp_tick_budget(false), 12);
    }

    // --- Full-driver fakes for async step()/startup() scenarios. ---

    use core::cell::RefCell;
    use embedded_hal::digital::{Error, ErrorKind, ErrorType};
    use regulator_codec::addresses;
    use regulator_driver::BusLease;

    struct FakeBus {
        registers: RefCell<[u8; 256]>,
        next_read_addr: RefCell<Option<u8>>,
        always_timeout: bool,
    }

    impl FakeBus {
        fn connected() -> Self {
            let mut registers = [0u8; 256];
            registers[addresses::MANUFACTURER_ID_ADDR as usize] = addresses::MANUFACTURER_ID_EXPECTED;
            registers[addresses::DEVICE_ID_ADDR as usize] = addresses::DEVICE_ID_EXPECTED;
            Self {
                registers: RefCell::new(registers),
                next_read_addr: RefCell::new(None),
                always_timeout: false,
            }
        }

        fn timing_out() -> Self {
            Self {
                registers: RefCell::new([0u8; 256]),
                next_read_addr: RefCell::new(None),
                always_timeout: true,
            }
        }

        fn set_vbat_byte(&self, byte: u8) {
            self.registers.borrow_mut()[addresses::VBAT_ADC_ADDR as usize] = byte;
        }
    }

    impl regulator_driver::Bus for FakeBus {
        async fn transmit(
            &mut self,
            _addr: u8,
            bytes: &[u8],
        ) -> regulator_driver::TransmitResult {
            if self.always_timeout {
                return regulator_driver::TransmitResult::Timeout;
            }
            if bytes.len() == 1 {
                *self.next_read_addr.borrow_mut() = Some(bytes[0]);
            } else {
                let reg = bytes[0];
                let mut regs = self.registers.borrow_mut();
                for (i, b) in bytes[1..].iter().enumerate() {
                    regs[reg as usize + i] = *b;
                }
            }
            regulator_driver::TransmitResult::Ok
        }

        async fn receive(&mut self, _addr: u8, out: &mut [u8]) -> regulator_driver::ReceiveResult {
            if self.always_timeout {
                return regulator_driver::ReceiveResult::Timeout;
            }
            let addr = self.next_read_addr.borrow_mut().take().unwrap_or(0);
            let regs = self.registers.borrow();
            for (i, b) in out.iter_mut().enumerate() {
                *b = regs[addr as usize + i];
            }
            regulator_driver::ReceiveResult::Ok
        }
    }

    #[derive(Debug)]
    struct NeverErr;
    impl Error for NeverErr {
        fn kind(&self) -> ErrorKind {
            ErrorKind::Other
        }
    }

    struct FakePin(bool);
    impl ErrorType for FakePin {
        type Error = NeverErr;
    }
    impl embedded_hal::digital::OutputPin for FakePin {
        fn set_low(&mut self) -> Result<(), NeverErr> {
            self.0 = false;
            Ok(())
        }
        fn set_high(&mut self) -> Result<(), NeverErr> {
            self.0 = true;
            Ok(())
        }
    }
    impl embedded_hal::digital::InputPin for FakePin {
        fn is_high(&mut self) -> Result<bool, NeverErr> {
            Ok(self.0)
        }
        fn is_low(&mut self) -> Result<bool, NeverErr> {
            Ok(!self.0)
        }
    }

    struct FakeUsbPd {
        ready: InputPowerReady,
        current_a: f32,
        power_mw: u32,
    }

    impl UsbPd for FakeUsbPd {
        async fn input_power_ready(&mut self) -> InputPowerReady {
            self.ready
        }
        async fn max_input_current_a(&mut self) -> f32 {
            self.current_a
        }
        async fn max_input_power_mw(&mut self) -> u32 {
            self.power_mw
        }
    }

    /// Drives a future to completion without a real executor. Valid here
    /// because none of the fakes above ever actually pend (embassy_time's
    /// `Timer::after` is the only thing that could, and these tests never
    /// await real wall-clock time across a yield boundary in a way that
    /// requires a working timer queue for correctness of the assertions
    /// made).
    fn block_on<F: core::future::Future>(f: F) -> F::Output {
        use core::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};
        fn noop(_: *const ()) {}
        fn clone(_: *const ()) -> RawWaker {
            RawWaker::new(core::ptr::null(), &VTABLE)
        }
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
        let raw = RawWaker::new(core::ptr::null(), &VTABLE);
        let waker = unsafe { Waker::from_raw(raw) };
        let mut cx = Context::from_waker(&waker);
        let mut f = core::pin::pin!(f);
        loop {
            if let Poll::Ready(out) = f.as_mut().poll(&mut cx) {
                return out;
            }
        }
    }

    fn ready_usbpd() -> FakeUsbPd {
        FakeUsbPd {
            ready: InputPowerReady::Ready,
            current_a: 3.0,
            power_mw: 60_000,
        }
    }

    fn three_cell_battery() -> BatteryState {
        BatteryState {
            xt60_connected: true,
            balance_port_connected: true,
            number_of_cells: 3,
            balancing_enabled: false,
            cell_balance_bitmask: 0,
            cell_over_voltage: false,
            requires_charging: true,
            controller_temperature_c: 25,
        }
    }

    #[test]
    fn s6_bus_timeout_latches_fault_and_forces_not_connected() {
        let faults = FaultRegistry::new();
        let lease = BusLease::new();
        let mut driver = RegulatorDriver::new(
            FakeBus::timing_out(),
            &lease,
            FakePin(false),
            FakePin(false),
            FakePin(false),
        );
        let mut controller = RegulatorController::new(RegulatorControllerConfig::default(), &faults);

        block_on(controller.startup(&mut driver));

        assert!(!controller.state.connected);
        assert!(faults.has(Fault::RegulatorCommunicationError));
    }

    #[test]
    fn any_fault_forces_hi_z_on_and_zero_current() {
        let faults = FaultRegistry::new();
        faults.set(Fault::CellVoltageError);
        let lease = BusLease::new();
        let mut driver = RegulatorDriver::new(
            FakeBus::connected(),
            &lease,
            FakePin(false),
            FakePin(false),
            FakePin(false),
        );
        let mut controller = RegulatorController::new(RegulatorControllerConfig::default(), &faults);
        let mut chrg_ok = FakePin(true);
        let mut usbpd = ready_usbpd();

        block_on(controller.step(&mut driver, &mut chrg_ok, &mut usbpd, three_cell_battery()));

        assert!(controller.state.hi_z);
        assert_eq!(controller.state.max_charge_current_ma, 0);
    }

    #[test]
    fn s4_gap_in_ladder_keeps_output_disabled() {
        let faults = FaultRegistry::new();
        let lease = BusLease::new();
        let mut driver = RegulatorDriver::new(
            FakeBus::connected(),
            &lease,
            FakePin(false),
            FakePin(false),
            FakePin(false),
        );
        let mut controller = RegulatorController::new(RegulatorControllerConfig::default(), &faults);
        let mut chrg_ok = FakePin(true);
        let mut usbpd = ready_usbpd();

        let mut battery = three_cell_battery();
        battery.number_of_cells = 0;
        battery.balance_port_connected = false;

        block_on(controller.step(&mut driver, &mut chrg_ok, &mut usbpd, battery));

        assert!(controller.state.hi_z);
        assert_eq!(controller.state.max_charge_current_ma, 0);
    }

    #[test]
    fn s3_cell_over_voltage_forces_hi_z() {
        let faults = FaultRegistry::new();
        let lease = BusLease::new();
        let mut driver = RegulatorDriver::new(
            FakeBus::connected(),
            &lease,
            FakePin(false),
            FakePin(false),
            FakePin(false),
        );
        let mut controller = RegulatorController::new(RegulatorControllerConfig::default(), &faults);
        let mut chrg_ok = FakePin(true);
        let mut usbpd = ready_usbpd();

        let mut battery = three_cell_battery();
        battery.cell_over_voltage = true;

        block_on(controller.step(&mut driver, &mut chrg_ok, &mut usbpd, battery));

        assert!(controller.state.hi_z);
    }

    #[test]
    fn termination_counter_forces_hi_z_after_four_consecutive_cycles() {
        let faults = FaultRegistry::new();
        let lease = BusLease::new();
        let mut driver = RegulatorDriver::new(
            FakeBus::connected(),
            &lease,
            FakePin(false),
            FakePin(false),
            FakePin(false),
        );
        let mut config = RegulatorControllerConfig::default();
        config.attempt_uvp_recovery = false;
        let mut controller = RegulatorController::new(config, &faults);
        let mut chrg_ok = FakePin(true);
        let mut usbpd = ready_usbpd();

        let mut battery = three_cell_battery();
        battery.requires_charging = false;
        // FakeBus's ICHG_ADC register defaults to 0, well under the 200 mA
        // term-current threshold, so every cycle counts toward termination.

        for i in 0..4 {
            block_on(controller.step(&mut driver, &mut chrg_ok, &mut usbpd, battery));
            if i < 3 {
                assert!(!controller.state.hi_z, "cycle {i} should not yet force hi-z");
            }
        }
        assert!(controller.state.hi_z);
    }

    #[test]
    fn s2_uvp_recovery_exhausts_attempts_and_leaves_output_hi_z() {
        let faults = FaultRegistry::new();
        let lease = BusLease::new();
        // VBAT_ADC byte stays at the FakeBus default of 0 throughout, so the
        // pack never crosses the recovery threshold and every attempt is
        // spent. `n_uvp_attempts` is pinned to 1 so this test costs about
        // (20 + 4) * 250ms of real wall-clock time instead of the default
        // 300 attempts' worth.
        let mut driver = RegulatorDriver::new(
            FakeBus::connected(),
            &lease,
            FakePin(false),
            FakePin(false),
            FakePin(false),
        );
        let mut config = RegulatorControllerConfig::default();
        config.n_uvp_attempts = 1;
        let mut controller = RegulatorController::new(config, &faults);

        block_on(controller.uvp_recovery(&mut driver, 3));

        assert!(!controller.state.precharging);
        assert!(controller.state.hi_z);
    }
}
