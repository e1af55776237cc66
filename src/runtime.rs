// src/runtime.rs
//! Control loop driving timer-based components on a single thread
//!
//! The loop repeatedly waits for the earliest armed deadline and polls the
//! reactor. It returns once nothing is armed, which is the point where the
//! caller applies operator or participant input.

use crate::error::{StimError, StimulatorError};
use crate::experiment::collaborators::{DataSink, Presenter};
use crate::experiment::controller::PhaseController;
use crate::hal::traits::StimulatorTransport;
use crate::stimulation::scheduler::StimulationScheduler;
use crate::utils::time::SharedClock;
use std::time::Duration;

/// A component with deadline-driven work
pub trait Reactor {
    type Error;

    /// Earliest armed deadline in clock nanoseconds
    fn next_deadline(&self) -> Option<u64>;

    /// Run everything due now
    fn poll(&mut self) -> Result<(), Self::Error>;
}

impl<T: StimulatorTransport> Reactor for StimulationScheduler<T> {
    type Error = StimulatorError;

    fn next_deadline(&self) -> Option<u64> {
        StimulationScheduler::next_deadline(self)
    }

    fn poll(&mut self) -> Result<(), Self::Error> {
        StimulationScheduler::poll(self)
    }
}

impl<T, P, S> Reactor for PhaseController<T, P, S>
where
    T: StimulatorTransport,
    P: Presenter,
    S: DataSink,
{
    type Error = StimError;

    fn next_deadline(&self) -> Option<u64> {
        PhaseController::next_deadline(self)
    }

    fn poll(&mut self) -> Result<(), Self::Error> {
        PhaseController::poll(self)
    }
}

/// Drives a [`Reactor`] against a clock
pub struct ControlLoop {
    clock: SharedClock,
}

impl ControlLoop {
    pub fn new(clock: SharedClock) -> Self {
        Self { clock }
    }

    /// Block until the reactor has nothing armed
    pub fn run_blocking<R: Reactor>(&self, reactor: &mut R) -> Result<(), R::Error> {
        while let Some(deadline) = reactor.next_deadline() {
            self.sleep_until(deadline);
            reactor.poll()?;
        }
        Ok(())
    }

    /// Run every deadline up to `until_nanos`, then wait until that instant
    pub fn run_until<R: Reactor>(&self, reactor: &mut R, until_nanos: u64) -> Result<(), R::Error> {
        while let Some(deadline) = reactor.next_deadline() {
            if deadline > until_nanos {
                break;
            }
            self.sleep_until(deadline);
            reactor.poll()?;
        }
        self.sleep_until(until_nanos);
        Ok(())
    }

    /// Async variant of [`ControlLoop::run_blocking`] awaiting a tokio timer
    /// between deadlines
    #[cfg(feature = "desktop")]
    pub async fn run<R: Reactor>(&self, reactor: &mut R) -> Result<(), R::Error> {
        while let Some(deadline) = reactor.next_deadline() {
            let wait = self.time_until(deadline);
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
            reactor.poll()?;
        }
        Ok(())
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    fn time_until(&self, deadline: u64) -> Duration {
        Duration::from_nanos(deadline.saturating_sub(self.clock.now_nanos()))
    }

    fn sleep_until(&self, deadline: u64) {
        let wait = self.time_until(deadline);
        if !wait.is_zero() {
            self.clock.sleep(wait);
        }
    }
}
