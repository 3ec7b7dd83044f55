//! In-memory gateways for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::gateway::{AudioSinkGateway, GatewayError, PowerGateway, SinkChange};
use crate::state::{AudioState, SinkId};

/// Counts concurrent calls and remembers the peak.
#[derive(Debug, Default)]
pub struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    fn enter(&self) -> InFlightGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard(self)
    }

    /// Highest number of overlapping calls seen.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct InFlightGuard<'a>(&'a InFlight);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Mixer that records every change it is asked to make.
#[derive(Debug, Default)]
pub struct FakeSink {
    initial: AudioState,
    sinks: Mutex<Vec<SinkId>>,
    applied: Mutex<Vec<SinkChange>>,
    fail_next: Mutex<Option<String>>,
    delay: Mutex<Duration>,
    in_flight: InFlight,
}

impl FakeSink {
    #[must_use]
    pub fn new(initial: AudioState) -> Self {
        Self { sinks: Mutex::new(initial.known_sinks.clone()), initial, ..Self::default() }
    }

    /// Changes applied so far, in order.
    #[must_use]
    pub fn applied(&self) -> Vec<SinkChange> {
        self.applied.lock().clone()
    }

    /// Make the next call fail.
    pub fn fail_next(&self, reason: &str) {
        *self.fail_next.lock() = Some(reason.to_string());
    }

    /// Delay every call.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Replace the sinks reported by enumeration.
    pub fn set_sinks(&self, sinks: &[&str]) {
        *self.sinks.lock() = sinks.iter().map(|s| SinkId::from(*s)).collect();
    }

    /// Concurrency tracking for `apply`.
    #[must_use]
    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }
}

impl AudioSinkGateway for FakeSink {
    async fn current_state(&self) -> Result<AudioState, GatewayError> {
        Ok(self.initial.clone())
    }

    async fn apply(&self, change: &SinkChange) -> Result<(), GatewayError> {
        let _guard = self.in_flight.enter();
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = self.fail_next.lock().take() {
            return Err(GatewayError::Device(reason));
        }
        self.applied.lock().push(change.clone());
        Ok(())
    }

    async fn enumerate_sinks(&self) -> Result<Vec<SinkId>, GatewayError> {
        Ok(self.sinks.lock().clone())
    }
}

/// Hub that records power switches.
#[derive(Debug, Default)]
pub struct FakePower {
    calls: Mutex<Vec<(SinkId, bool)>>,
    fail_next: Mutex<Option<String>>,
}

impl FakePower {
    /// Switches requested so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<(SinkId, bool)> {
        self.calls.lock().clone()
    }

    /// Make the next call fail.
    pub fn fail_next(&self, reason: &str) {
        *self.fail_next.lock() = Some(reason.to_string());
    }
}

impl PowerGateway for FakePower {
    async fn set_power(&self, sink: &SinkId, on: bool) -> Result<(), GatewayError> {
        if let Some(reason) = self.fail_next.lock().take() {
            return Err(GatewayError::Device(reason));
        }
        self.calls.lock().push((sink.clone(), on));
        Ok(())
    }
}
