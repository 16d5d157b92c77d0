//! Bitfield registers expressed through the declarative register DSL.
//!
//! `ChargeStatus` and `AdcOption` are plain bitfields at fixed positions, so
//! they're declared with [`device_descriptor::device!`] rather than hand
//! rolled. Sub-fields use `u8` rather than `bool`/an enum because the field
//! codegen's `TryFrom`/`Into` bound is only satisfied generically for
//! integer field types when the register width is wider than a byte.

use device_descriptor::*;

device_descriptor::device! {
    ChargeStatus(u16, addr = 0x20, default = 0x0000) {
        charging_active(pos = 15, width = 1): u8
    }

    AdcOption(u16, addr = 0x3A, default = 0x0000) {
        enable_mask(pos = 0, width = 8): u8,
        start_conversion(pos = 14, width = 1): u8,
        one_shot(pos = 15, width = 1): u8
    }
}

/// ChargeOption0 is a fixed operating-mode bitfield; the regulator never
/// sees any value but this one, so it's carried as a constant rather than a
/// writable register.
pub const CHARGE_OPTION_0_BYTES: [u8; 2] = [0x0E, 0x26];

/// All five sampled ADC channels enabled.
pub const ADC_ENABLE_ALL: u8 = 0b0111_1111;

pub fn decode_charge_status(bytes: [u8; 2]) -> bool {
    let reg = ChargeStatus::from_bits(u16::from_le_bytes(bytes));
    reg.charging_active().read().unwrap_or(0) != 0
}

/// ADCOption write that enables every channel in one-shot mode without
/// starting a conversion yet.
pub fn encode_adc_configure() -> [u8; 2] {
    let reg = AdcOption::new(|w| w.enable_mask().write(ADC_ENABLE_ALL).one_shot().write(1));
    reg.bits().to_le_bytes()
}

/// ADCOption write that additionally sets the start-conversion bit.
pub fn encode_adc_start_conversion() -> [u8; 2] {
    let reg = AdcOption::new(|w| {
        w.enable_mask()
            .write(ADC_ENABLE_ALL)
            .one_shot()
            .write(1)
            .start_conversion()
            .write(1)
    });
    reg.bits().to_le_bytes()
}

/// True while the regulator is still performing the requested conversion.
pub fn decode_adc_conversion_pending(bytes: [u8; 2]) -> bool {
    let reg = AdcOption::from_bits(u16::from_le_bytes(bytes));
    reg.start_conversion().read().unwrap_or(0) != 0
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn charge_status_decodes_msb_bit() {
        assert!(!decode_charge_status([0x00, 0x00]));
        assert!(decode_charge_status([0x00, 0x80]));
        assert!(!decode_charge_status([0xFF, 0x7F]));
    }

    #[test]
    fn adc_configure_enables_all_channels_without_starting() {
        let bytes = encode_adc_configure();
        assert!(!decode_adc_conversion_pending(bytes));
        let reg = AdcOption::from_bits(u16::from_le_bytes(bytes));
        assert_eq!(reg.enable_mask().read(), Some(ADC_ENABLE_ALL));
    }

    #[test]
    fn adc_start_conversion_sets_pending_bit() {
        let bytes = encode_adc_start_conversion();
        assert!(decode_adc_conversion_pending(bytes));
    }
}
