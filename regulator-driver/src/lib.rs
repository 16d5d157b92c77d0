//! Regulator driver: wraps [`regulator_codec`] above a serialized two-wire
//! bus transport and the three digital lines the driver itself owns
//! (spec.md §4.2).

#![no_std]

mod bus;
mod driver;

pub use bus::{Bus, BusLease, BusTransportError, ReceiveResult, TransmitResult};
pub use driver::{ChargeStatus, Connected, RegulatorDriver, DEVICE_ADDRESS};
