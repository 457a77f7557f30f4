//! Exclusive ownership of the ADC.
//!
//! A one-shot scan and a streaming session both reconfigure the ADC trigger,
//! so at most one of them may run at a time. The streaming claim doubles as
//! the process-wide session singleton: whoever holds it is the active
//! streaming connection.

use aiod_core::ConnectionId;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{AcquisitionError, AdcOwner, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdcState {
    Idle,
    Scanning,
    Streaming(ConnectionId),
}

/// Arbitrates the ADC between scans and the streaming session.
#[derive(Debug)]
pub struct AdcArbiter {
    state: Mutex<AdcState>,
}

impl AdcArbiter {
    /// New, idle.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AdcState::Idle),
        }
    }

    /// Claim the ADC for a scan. The claim ends when the guard drops.
    pub fn begin_scan(&self) -> Result<ScanClaim<'_>> {
        let mut state = self.state.lock();
        match *state {
            AdcState::Idle => {
                *state = AdcState::Scanning;
                Ok(ScanClaim { arbiter: self })
            }
            other => Err(AcquisitionError::AdcBusy {
                owner: owner_of(other).unwrap_or(AdcOwner::Scan),
            }),
        }
    }

    /// Claim the ADC for the streaming session of `connection`.
    ///
    /// An active session is never preempted; the caller gets
    /// [`AcquisitionError::StreamBusy`] naming it.
    pub fn claim_stream(&self, connection: ConnectionId) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            AdcState::Idle => {
                *state = AdcState::Streaming(connection);
                debug!(connection = %connection, "ADC claimed for streaming");
                Ok(())
            }
            AdcState::Streaming(active) => Err(AcquisitionError::StreamBusy { active }),
            AdcState::Scanning => Err(AcquisitionError::AdcBusy {
                owner: AdcOwner::Scan,
            }),
        }
    }

    /// Release the streaming claim if `connection` holds it.
    pub fn release_stream(&self, connection: ConnectionId) -> bool {
        let mut state = self.state.lock();
        if *state == AdcState::Streaming(connection) {
            *state = AdcState::Idle;
            debug!(connection = %connection, "ADC streaming claim released");
            true
        } else {
            false
        }
    }

    /// Current owner, if any.
    pub fn owner(&self) -> Option<AdcOwner> {
        owner_of(*self.state.lock())
    }

    /// Connection owning the streaming session, if any.
    pub fn streaming_owner(&self) -> Option<ConnectionId> {
        match *self.state.lock() {
            AdcState::Streaming(id) => Some(id),
            _ => None,
        }
    }

    fn end_scan(&self) {
        let mut state = self.state.lock();
        if *state == AdcState::Scanning {
            *state = AdcState::Idle;
        }
    }
}

impl Default for AdcArbiter {
    fn default() -> Self {
        Self::new()
    }
}

fn owner_of(state: AdcState) -> Option<AdcOwner> {
    match state {
        AdcState::Idle => None,
        AdcState::Scanning => Some(AdcOwner::Scan),
        AdcState::Streaming(id) => Some(AdcOwner::Stream(id)),
    }
}

/// RAII scan claim returned by [`AdcArbiter::begin_scan`].
#[derive(Debug)]
pub struct ScanClaim<'a> {
    arbiter: &'a AdcArbiter,
}

impl Drop for ScanClaim<'_> {
    fn drop(&mut self) {
        self.arbiter.end_scan();
    }
}
