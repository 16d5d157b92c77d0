//! Register addresses and datasheet identity constants for the regulator.

pub const MANUFACTURER_ID_ADDR: u8 = 0x2E;
pub const DEVICE_ID_ADDR: u8 = 0x2F;
pub const CHARGE_OPTION_0_ADDR: u8 = 0x00;
pub const CHARGE_CURRENT_ADDR: u8 = 0x02;
pub const MAX_CHARGE_VOLTAGE_ADDR: u8 = 0x04;
pub const MINIMUM_SYSTEM_VOLTAGE_ADDR: u8 = 0x0D;
pub const ADC_OPTION_ADDR: u8 = 0x3A;
pub const CHARGE_STATUS_ADDR: u8 = 0x20;
pub const VBAT_ADC_ADDR: u8 = 0x2C;
pub const VSYS_ADC_ADDR: u8 = 0x2D;
pub const ICHG_ADC_ADDR: u8 = 0x2A;
pub const IIN_ADC_ADDR: u8 = 0x2B;
pub const VBUS_ADC_ADDR: u8 = 0x27;

/// Datasheet constants; identify() compares against these.
pub const MANUFACTURER_ID_EXPECTED: u8 = 0x40;
pub const DEVICE_ID_EXPECTED: u8 = 0x78;
