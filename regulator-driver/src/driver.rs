use embassy_time::{Duration, Instant, Timer};
use embedded_hal::digital::OutputPin;
use regulator_codec::adc::AdcRawSample;
use regulator_codec::{addresses, AdcSample};

use crate::bus::{Bus, BusLease, BusTransportError, ReceiveResult, TransmitResult};

/// BQ25703A-class regulator's fixed 7-bit bus address.
pub const DEVICE_ADDRESS: u8 = 0x6B;

/// Bounded poll budget for `sample_adc`'s start-conversion wait: 80 ms per
/// poll, stop retrying after this many polls (spec.md §4.2: "a bounded
/// interval").
const ADC_POLL_PERIOD: Duration = Duration::from_millis(80);
const ADC_POLL_MAX_ATTEMPTS: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connected {
    Connected,
    NotConnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChargeStatus {
    pub charging_active: bool,
}

/// Wraps [`regulator_codec`] above a serialized [`Bus`], plus the three
/// digital lines the driver itself owns (spec.md §4.2).
pub struct RegulatorDriver<'a, B, HIZ, OTG, FAN> {
    bus: B,
    lease: &'a BusLease,
    hi_z_pin: HIZ,
    otg_pin: OTG,
    fan_en_pin: FAN,
}

impl<'a, B, HIZ, OTG, FAN> RegulatorDriver<'a, B, HIZ, OTG, FAN>
where
    B: Bus,
    HIZ: OutputPin,
    OTG: OutputPin,
    FAN: OutputPin,
{
    pub fn new(bus: B, lease: &'a BusLease, hi_z_pin: HIZ, otg_pin: OTG, fan_en_pin: FAN) -> Self {
        Self {
            bus,
            lease,
            hi_z_pin,
            otg_pin,
            fan_en_pin,
        }
    }

    async fn write_register(&mut self, addr: u8, bytes: &[u8]) -> Result<(), BusTransportError> {
        let Some(_guard) = self.lease.acquire().await else {
            return Err(BusTransportError::Timeout);
        };
        let mut frame = heapless::Vec::<u8, 3>::new();
        let _ = frame.push(addr);
        let _ = frame.extend_from_slice(bytes);

        let deadline = Instant::now() + crate::bus::BUS_TRANSACTION_TIMEOUT;
        loop {
            match self.bus.transmit(DEVICE_ADDRESS, &frame).await {
                TransmitResult::Ok => return Ok(()),
                TransmitResult::Timeout => return Err(BusTransportError::Timeout),
                TransmitResult::NakBusy => {
                    if Instant::now() >= deadline {
                        return Err(BusTransportError::Timeout);
                    }
                }
            }
        }
    }

    async fn read_register(&mut self, addr: u8, out: &mut [u8]) -> Result<(), BusTransportError> {
        let Some(_guard) = self.lease.acquire().await else {
            return Err(BusTransportError::Timeout);
        };

        let deadline = Instant::now() + crate::bus::BUS_TRANSACTION_TIMEOUT;
        loop {
            match self.bus.transmit(DEVICE_ADDRESS, &[addr]).await {
                TransmitResult::Ok => break,
                TransmitResult::Timeout => return Err(BusTransportError::Timeout),
                TransmitResult::NakBusy => {
                    if Instant::now() >= deadline {
                        return Err(BusTransportError::Timeout);
                    }
                }
            }
        }

        match self.bus.receive(DEVICE_ADDRESS, out).await {
            ReceiveResult::Ok => Ok(()),
            ReceiveResult::Timeout => Err(BusTransportError::Timeout),
        }
    }

    /// Reads manufacturer and device ID. Clears `RegulatorCommunicationError`
    /// on a match; the caller is responsible for setting the fault on
    /// `NotConnected` (spec.md §4.2).
    pub async fn identify(&mut self) -> Connected {
        let mut manufacturer = [0u8; 1];
        let mut device = [0u8; 1];

        let ok = self
            .read_register(addresses::MANUFACTURER_ID_ADDR, &mut manufacturer)
            .await
            .is_ok()
            && self
                .read_register(addresses::DEVICE_ID_ADDR, &mut device)
                .await
                .is_ok();

        if ok
            && manufacturer[0] == addresses::MANUFACTURER_ID_EXPECTED
            && device[0] == addresses::DEVICE_ID_EXPECTED
        {
            logger::debug!("regulator identify: match");
            Connected::Connected
        } else {
            logger::warn!("regulator identify: no match or bus failure");
            Connected::NotConnected
        }
    }

    pub async fn configure_adc(&mut self) -> Result<(), BusTransportError> {
        let bytes = regulator_codec::registers::encode_adc_configure();
        self.write_register(addresses::ADC_OPTION_ADDR, &bytes).await
    }

    /// Triggers a conversion and polls the start-conversion bit (80 ms per
    /// poll, bounded) until it clears, then harvests the five result
    /// registers.
    pub async fn sample_adc(&mut self) -> Result<AdcSample, BusTransportError> {
        let start_bytes = regulator_codec::registers::encode_adc_start_conversion();
        self.write_register(addresses::ADC_OPTION_ADDR, &start_bytes)
            .await?;

        for _ in 0..ADC_POLL_MAX_ATTEMPTS {
            Timer::after(ADC_POLL_PERIOD).await;
            let mut bytes = [0u8; 2];
            self.read_register(addresses::ADC_OPTION_ADDR, &mut bytes)
                .await?;
            if !regulator_codec::registers::decode_adc_conversion_pending(bytes) {
                break;
            }
        }

        let mut raw = AdcRawSample::default();
        self.read_register(addresses::VBAT_ADC_ADDR, core::slice::from_mut(&mut raw.vbat))
            .await?;
        self.read_register(addresses::VSYS_ADC_ADDR, core::slice::from_mut(&mut raw.vsys))
            .await?;
        self.read_register(addresses::VBUS_ADC_ADDR, core::slice::from_mut(&mut raw.vbus))
            .await?;
        self.read_register(addresses::ICHG_ADC_ADDR, core::slice::from_mut(&mut raw.ichg))
            .await?;
        self.read_register(addresses::IIN_ADC_ADDR, core::slice::from_mut(&mut raw.iin))
            .await?;

        Ok(regulator_codec::adc::decode_adc_sample(raw))
    }

    /// Writes MinimumSystemVoltage and MaxChargeVoltage for `cells`.
    /// `cells = 0` writes zeros, disabling the charge-voltage target.
    pub async fn set_charge_voltage(&mut self, cells: u8) -> Result<(), BusTransportError> {
        let min_sys = regulator_codec::encode_minimum_system_voltage(cells);
        self.write_register(addresses::MINIMUM_SYSTEM_VOLTAGE_ADDR, &[min_sys])
            .await?;

        let max_charge = regulator_codec::encode_max_charge_voltage(cells);
        self.write_register(addresses::MAX_CHARGE_VOLTAGE_ADDR, &max_charge)
            .await
    }

    pub async fn set_charge_current(&mut self, ma: u16) -> Result<(), BusTransportError> {
        let bytes = regulator_codec::encode_charge_current(ma);
        self.write_register(addresses::CHARGE_CURRENT_ADDR, &bytes)
            .await
    }

    pub async fn write_charge_option_0(&mut self) -> Result<(), BusTransportError> {
        self.write_register(
            addresses::CHARGE_OPTION_0_ADDR,
            &regulator_codec::registers::CHARGE_OPTION_0_BYTES,
        )
        .await
    }

    pub async fn charge_status(&mut self) -> Result<ChargeStatus, BusTransportError> {
        let mut bytes = [0u8; 2];
        self.read_register(addresses::CHARGE_STATUS_ADDR, &mut bytes)
            .await?;
        Ok(ChargeStatus {
            charging_active: regulator_codec::registers::decode_charge_status(bytes),
        })
    }

    /// Drives the high-impedance control line. The fan-enable line
    /// (active-low) is driven inversely: the fan runs whenever output is
    /// enabled.
    pub fn hi_z(&mut self, on: bool) {
        let _ = if on {
            self.hi_z_pin.set_high()
        } else {
            self.hi_z_pin.set_low()
        };
        let _ = if on {
            self.fan_en_pin.set_high()
        } else {
            self.fan_en_pin.set_low()
        };
    }

    /// Drives the OTG-enable line. OTG stays disabled throughout normal
    /// charging (spec.md §4.2); the operation exists because the chip
    /// supports it.
    pub fn otg(&mut self, on: bool) {
        let _ = if on {
            self.otg_pin.set_high()
        } else {
            self.otg_pin.set_low()
        };
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use core::cell::RefCell;
    use embedded_hal::digital::{Error, ErrorKind, ErrorType};

    struct FakeBus {
        registers: RefCell<[u8; 256]>,
        next_read_addr: RefCell<Option<u8>>,
        nak_budget: RefCell<u8>,
    }

    impl FakeBus {
        fn new() -> Self {
            let mut registers = [0u8; 256];
            registers[addresses::MANUFACTURER_ID_ADDR as usize] =
                addresses::MANUFACTURER_ID_EXPECTED;
            registers[addresses::DEVICE_ID_ADDR as usize] = addresses::DEVICE_ID_EXPECTED;
            Self {
                registers: RefCell::new(registers),
                next_read_addr: RefCell::new(None),
                nak_budget: RefCell::new(0),
            }
        }

        fn with_naks(naks: u8) -> Self {
            let bus = Self::new();
            *bus.nak_budget.borrow_mut() = naks;
            bus
        }
    }

    impl Bus for FakeBus {
        async fn transmit(&mut self, _addr: u8, bytes: &[u8]) -> TransmitResult {
            {
                let mut budget = self.nak_budget.borrow_mut();
                if *budget > 0 {
                    *budget -= 1;
                    return TransmitResult::NakBusy;
                }
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
            TransmitResult::Ok
        }

        async fn receive(&mut self, _addr: u8, out: &mut [u8]) -> ReceiveResult {
            let addr = self.next_read_addr.borrow_mut().take().unwrap_or(0);
            let regs = self.registers.borrow();
            for (i, b) in out.iter_mut().enumerate() {
                *b = regs[addr as usize + i];
            }
            ReceiveResult::Ok
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
    impl OutputPin for FakePin {
        fn set_low(&mut self) -> Result<(), NeverErr> {
            self.0 = false;
            Ok(())
        }
        fn set_high(&mut self) -> Result<(), NeverErr> {
            self.0 = true;
            Ok(())
        }
    }

    /// Drives a future to completion without a real executor. Valid here
    /// because none of the fakes above ever actually pend.
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

    #[test]
    fn identify_matches_fake_registers() {
        let lease = BusLease::new();
        let mut driver = RegulatorDriver::new(
            FakeBus::new(),
            &lease,
            FakePin(false),
            FakePin(false),
            FakePin(false),
        );
        assert_eq!(block_on(driver.identify()), Connected::Connected);
    }

    #[test]
    fn mismatched_ids_report_not_connected() {
        let bus = FakeBus::new();
        bus.registers.borrow_mut()[addresses::DEVICE_ID_ADDR as usize] = 0;
        let lease = BusLease::new();
        let mut driver =
            RegulatorDriver::new(bus, &lease, FakePin(false), FakePin(false), FakePin(false));
        assert_eq!(block_on(driver.identify()), Connected::NotConnected);
    }

    #[test]
    fn charge_current_round_trips_through_the_bus() {
        let lease = BusLease::new();
        let mut driver = RegulatorDriver::new(
            FakeBus::new(),
            &lease,
            FakePin(false),
            FakePin(false),
            FakePin(false),
        );
        block_on(driver.set_charge_current(4_992)).unwrap();
        let mut bytes = [0u8; 2];
        block_on(driver.read_register(addresses::CHARGE_CURRENT_ADDR, &mut bytes)).unwrap();
        assert_eq!(regulator_codec::decode_charge_current(bytes), 4_992);
    }

    #[test]
    fn retries_through_naks_within_budget() {
        let lease = BusLease::new();
        let mut driver = RegulatorDriver::new(
            FakeBus::with_naks(3),
            &lease,
            FakePin(false),
            FakePin(false),
            FakePin(false),
        );
        assert_eq!(block_on(driver.set_charge_current(1_000)), Ok(()));
    }

    #[test]
    fn hi_z_drives_fan_enable_inversely() {
        let lease = BusLease::new();
        let mut driver = RegulatorDriver::new(
            FakeBus::new(),
            &lease,
            FakePin(false),
            FakePin(false),
            FakePin(true),
        );
        driver.hi_z(true);
        assert!(driver.fan_en_pin.0);
        driver.hi_z(false);
        assert!(!driver.fan_en_pin.0);
    }
}
