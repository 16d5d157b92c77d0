//! The regulator's two-wire serial bus, modeled as the minimal
//! transmit/receive surface spec.md §6 names, plus the process-wide lease
//! that serializes access to it.

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};
use embassy_time::{with_timeout, Duration};

/// Result of a single transmit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitResult {
    Ok,
    /// The device NAK'd; the caller should retry while budget remains.
    NakBusy,
    Timeout,
}

/// Result of a single receive attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveResult {
    Ok,
    Timeout,
}

/// The bus collaborator (spec.md §6): low-level transmit/receive, with no
/// knowledge of registers or retry policy. Implemented by the surrounding
/// firmware's bus driver.
pub trait Bus {
    async fn transmit(&mut self, addr: u8, bytes: &[u8]) -> TransmitResult;
    async fn receive(&mut self, addr: u8, out: &mut [u8]) -> ReceiveResult;
}

/// Uniform bus failure, raised as `RegulatorCommunicationError` by every
/// caller regardless of which primitive failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusTransportError {
    Timeout,
}

/// How long a transmit retries while the device reports `NakBusy` before
/// giving up.
pub const BUS_TRANSACTION_TIMEOUT: Duration = Duration::from_millis(300);

/// Maximum wait to acquire the bus lease itself.
pub const BUS_LEASE_WAIT: Duration = Duration::from_millis(300);

/// Single process-wide serialization point for the bus. Every Regulator
/// Driver operation acquires this before touching the bus and releases it
/// on every exit path, including timeout (spec.md §5).
pub struct BusLease {
    mutex: Mutex<NoopRawMutex, ()>,
}

impl BusLease {
    pub const fn new() -> Self {
        Self {
            mutex: Mutex::new(()),
        }
    }

    /// Acquires the lease, waiting at most [`BUS_LEASE_WAIT`]. `None` means
    /// the wait timed out; the caller treats this exactly like a bus
    /// timeout (skip the transaction, raise `RegulatorCommunicationError`).
    pub async fn acquire(&self) -> Option<MutexGuard<'_, NoopRawMutex, ()>> {
        with_timeout(BUS_LEASE_WAIT, self.mutex.lock()).await.ok()
    }
}

impl Default for BusLease {
    fn default() -> Self {
        Self::new()
    }
}
