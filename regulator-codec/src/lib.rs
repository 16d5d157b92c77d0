//! Pure register encode/decode for a BQ25703A-class buck-boost charge
//! regulator. No bus or async dependency: every function here takes and
//! returns plain bytes or value types.

#![no_std]

pub mod addresses;
pub mod adc;
pub mod current;
pub mod registers;
pub mod voltage;

pub use adc::{AdcRawSample, AdcSample};
pub use current::{encode_charge_current, decode_charge_current, CHARGE_CURRENT_CEILING_MA};
pub use registers::{
    decode_adc_conversion_pending, decode_charge_status, encode_adc_configure,
    encode_adc_start_conversion, CHARGE_OPTION_0_BYTES,
};
pub use voltage::{
    decode_max_charge_voltage, decode_minimum_system_voltage, encode_max_charge_voltage,
    encode_minimum_system_voltage,
};
