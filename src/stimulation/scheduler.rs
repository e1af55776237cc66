// src/stimulation/scheduler.rs
//! Keep-alive scheduling for a running mid-level stimulation
//!
//! A started stimulation is kept alive by one status query per keep-alive
//! interval. Inside the final tail window no more keep-alives are sent and a
//! single timer fires at exactly the requested duration. Every keep-alive arms
//! an error poll that reads back the per-channel error flags.
//!
//! All waits are entries in a [`TimerQueue`]; the control thread calls
//! [`StimulationScheduler::poll`] when [`StimulationScheduler::next_deadline`]
//! is reached.

use crate::config::SchedulerTiming;
use crate::error::StimulatorError;
use crate::hal::session::DeviceSession;
use crate::hal::traits::StimulatorTransport;
use crate::hal::types::{ChannelId, PulseConfig};
use crate::stimulation::timer::TimerQueue;
use crate::utils::time::{duration_to_nanos, SharedClock};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Called once when a stimulation ran for its full duration
pub type TerminationCallback = Box<dyn FnMut()>;
/// Called for every channel the device reported an error on
pub type ErrorCallback = Box<dyn FnMut(ChannelId)>;

/// Scheduler state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    /// Natural completion in progress
    Draining,
    /// Device fault being handled
    Erroring,
    Stopped,
}

impl SchedulerState {
    /// Whether a stimulation is outstanding
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SchedulerState::Running | SchedulerState::Draining | SchedulerState::Erroring
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StimTimer {
    Loop,
    ErrorPoll,
}

struct ActiveStimulation {
    duration: Duration,
    keep_stimulating: bool,
    channels: Vec<ChannelId>,
    on_termination: TerminationCallback,
    on_error: ErrorCallback,
}

/// Owns the [`DeviceSession`] and drives one stimulation at a time
pub struct StimulationScheduler<T: StimulatorTransport> {
    session: DeviceSession<T>,
    clock: SharedClock,
    timing: SchedulerTiming,
    timers: TimerQueue<StimTimer>,
    state: SchedulerState,
    active: Option<ActiveStimulation>,
    start_nanos: Option<u64>,
}

impl<T: StimulatorTransport> StimulationScheduler<T> {
    pub fn new(session: DeviceSession<T>, timing: SchedulerTiming) -> Self {
        let clock = session.clock().clone();
        Self {
            session,
            clock,
            timing,
            timers: TimerQueue::new(),
            state: SchedulerState::Idle,
            active: None,
            start_nanos: None,
        }
    }

    /// Upload a pulse for the next stimulation
    pub fn configure_pulse(&mut self, pulse: &PulseConfig) -> Result<(), StimulatorError> {
        if self.state.is_active() {
            return Err(StimulatorError::Busy);
        }
        self.session.upload_pulse(pulse)
    }

    /// Disable every channel in the pending configuration
    pub fn clear_pulses(&mut self) -> Result<(), StimulatorError> {
        if self.state.is_active() {
            return Err(StimulatorError::Busy);
        }
        self.session.clear_pulses();
        Ok(())
    }

    /// Start stimulating the configured channels for `duration`.
    ///
    /// Returns the start time in clock nanoseconds. On a failed initial update
    /// the scheduler state is left untouched.
    pub fn start<F, E>(
        &mut self,
        duration: Duration,
        on_termination: F,
        on_error: E,
    ) -> Result<u64, StimulatorError>
    where
        F: FnMut() + 'static,
        E: FnMut(ChannelId) + 'static,
    {
        if self.state.is_active() {
            return Err(StimulatorError::AlreadyRunning);
        }

        let start = self.clock.now_nanos();
        self.session.send_update()?;

        let channels = self.session.active_channels();
        info!(
            duration_ms = duration.as_millis() as u64,
            channels = ?channels,
            "Stimulation started"
        );
        self.timers.cancel_all();
        self.start_nanos = Some(start);
        self.active = Some(ActiveStimulation {
            duration,
            keep_stimulating: true,
            channels,
            on_termination: Box::new(on_termination),
            on_error: Box::new(on_error),
        });
        self.state = SchedulerState::Running;

        self.run_loop()?;
        Ok(start)
    }

    /// Stop the outstanding stimulation.
    ///
    /// Returns `Ok(false)` when nothing was running. Callbacks are dropped
    /// before the device is stopped, so none fires afterwards.
    pub fn stop(&mut self) -> Result<bool, StimulatorError> {
        if !self.state.is_active() {
            return Ok(false);
        }
        self.active = None;
        self.halt()?;
        Ok(true)
    }

    /// Fire every due timer in deadline order
    pub fn poll(&mut self) -> Result<(), StimulatorError> {
        while let Some((_, timer)) = self.timers.pop_due(self.clock.now_nanos()) {
            match timer {
                StimTimer::Loop => self.run_loop()?,
                StimTimer::ErrorPoll => self.check_for_errors()?,
            }
        }
        Ok(())
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.next_deadline()
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn start_time(&self) -> Option<u64> {
        self.start_nanos
    }

    /// Time since the last start, zero when never started
    pub fn elapsed(&self) -> Duration {
        self.start_nanos
            .map(|start| self.clock.elapsed_since(start))
            .unwrap_or_default()
    }

    /// Channels of the outstanding stimulation
    pub fn active_channels(&self) -> &[ChannelId] {
        self.active
            .as_ref()
            .map(|active| active.channels.as_slice())
            .unwrap_or(&[])
    }

    pub fn timing(&self) -> &SchedulerTiming {
        &self.timing
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn session(&self) -> &DeviceSession<T> {
        &self.session
    }

    /// Mutable session access, refused while a stimulation is outstanding
    pub fn session_mut(&mut self) -> Option<&mut DeviceSession<T>> {
        if self.state.is_active() {
            None
        } else {
            Some(&mut self.session)
        }
    }

    fn run_loop(&mut self) -> Result<(), StimulatorError> {
        let Some(active) = self.active.as_ref() else {
            return Ok(());
        };
        if !active.keep_stimulating {
            return self.finish();
        }
        let duration = active.duration;

        let now = self.clock.now_nanos();
        let elapsed = self.elapsed();
        match self.session.send_keepalive() {
            Ok(()) => debug!(elapsed_ms = elapsed.as_millis() as u64, "Keep-alive sent"),
            Err(e) => error!(error = %e, "Keep-alive failed"),
        }
        self.timers.schedule_at(
            now + duration_to_nanos(self.timing.error_poll_delay()),
            StimTimer::ErrorPoll,
        );

        if elapsed + self.timing.tail_window() < duration {
            self.timers.schedule_at(
                now + duration_to_nanos(self.timing.keepalive_interval()),
                StimTimer::Loop,
            );
        } else {
            let start = self.start_nanos.unwrap_or(now);
            let end = start.saturating_add(duration_to_nanos(duration)).max(now);
            if let Some(active) = self.active.as_mut() {
                active.keep_stimulating = false;
            }
            self.timers.schedule_at(end, StimTimer::Loop);
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), StimulatorError> {
        let elapsed = self.elapsed();
        let duration = self
            .active
            .as_ref()
            .map(|active| active.duration)
            .unwrap_or_default();
        if elapsed < duration {
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                duration_ms = duration.as_millis() as u64,
                "Stimulation finished before its duration elapsed"
            );
        }

        self.state = SchedulerState::Draining;
        let stopped = self.halt();
        let active = self.active.take();
        stopped?;
        if let Some(mut active) = active {
            (active.on_termination)();
        }
        Ok(())
    }

    fn check_for_errors(&mut self) -> Result<(), StimulatorError> {
        if self.state != SchedulerState::Running {
            return Ok(());
        }
        let faulted = match self.session.poll_channel_errors() {
            Ok(faulted) => faulted,
            Err(e) => {
                error!(error = %e, "Channel status query failed");
                return Ok(());
            }
        };
        if faulted.is_empty() {
            return Ok(());
        }

        self.state = SchedulerState::Erroring;
        if let Some(mut active) = self.active.take() {
            for channel in faulted {
                error!(channel = %channel, "The stimulator has reported an error");
                (active.on_error)(channel);
            }
        }
        self.halt()
    }

    /// Cancel timers, disable channels and stop the device
    fn halt(&mut self) -> Result<(), StimulatorError> {
        self.timers.cancel_all();
        self.session.clear_pulses();
        let result = self.session.send_stop();
        self.state = SchedulerState::Stopped;

        let elapsed_ms = self.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => info!(elapsed_ms, "Stimulation stopped"),
            Err(e) => error!(elapsed_ms, error = %e, "Failed to stop stimulation"),
        }
        result
    }
}

impl<T: StimulatorTransport> Drop for StimulationScheduler<T> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!(error = %e, "Failed to stop stimulation on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::constants::serial::DEFAULT_PORT;
    use crate::hal::simulator::{SimulatedStimulator, SimulatorHandle};
    use crate::hal::types::CommandKind;
    use crate::utils::time::{MockTimeProvider, TimeProvider};
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::Arc;

    fn scheduler() -> (
        StimulationScheduler<SimulatedStimulator>,
        SimulatorHandle,
        Arc<MockTimeProvider>,
    ) {
        let clock = Arc::new(MockTimeProvider::new(0));
        let sim = SimulatedStimulator::with_defaults(clock.clone());
        let handle = sim.handle();
        let mut session = DeviceSession::new(sim, clock.clone());
        session.connect(DEFAULT_PORT).expect("connect");
        let mut scheduler = StimulationScheduler::new(session, SchedulerTiming::default());
        let pulse = PulseConfig::new(ChannelId::new(1).unwrap(), 2.0, 700, 500, 20.0).unwrap();
        scheduler.configure_pulse(&pulse).unwrap();
        handle.clear_log();
        (scheduler, handle, clock)
    }

    fn advance_to(
        scheduler: &mut StimulationScheduler<SimulatedStimulator>,
        clock: &MockTimeProvider,
        until_nanos: u64,
    ) {
        while let Some(deadline) = scheduler.next_deadline() {
            if deadline > until_nanos {
                break;
            }
            clock.set_time(deadline.max(clock.now_nanos()));
            scheduler.poll().unwrap();
        }
        clock.set_time(until_nanos.max(clock.now_nanos()));
    }

    #[test]
    fn test_start_runs_first_iteration() {
        let (mut scheduler, handle, _) = scheduler();
        let start = scheduler
            .start(Duration::from_secs(5), || {}, |_| {})
            .unwrap();
        assert_eq!(start, 0);
        assert_eq!(scheduler.state(), SchedulerState::Running);
        assert_eq!(handle.count(CommandKind::MidLevelUpdate), 1);
        assert_eq!(handle.count(CommandKind::MidLevelGetCurrentData), 1);
        // Error poll is the earliest armed timer
        assert_eq!(scheduler.next_deadline(), Some(150_000_000));
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let (mut scheduler, _, _) = scheduler();
        scheduler.start(Duration::from_secs(5), || {}, |_| {}).unwrap();
        assert_eq!(
            scheduler.start(Duration::from_secs(5), || {}, |_| {}),
            Err(StimulatorError::AlreadyRunning)
        );
        assert_eq!(scheduler.state(), SchedulerState::Running);
    }

    #[test]
    fn test_failed_start_keeps_state() {
        let (mut scheduler, handle, _) = scheduler();
        handle.set_command_failure(CommandKind::MidLevelUpdate, true);
        assert!(scheduler.start(Duration::from_secs(5), || {}, |_| {}).is_err());
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(scheduler.next_deadline(), None);
    }

    #[test]
    fn test_natural_completion_invokes_termination() {
        let (mut scheduler, handle, clock) = scheduler();
        let terminated = Rc::new(Cell::new(0));
        let counter = terminated.clone();
        scheduler
            .start(Duration::from_secs(3), move || counter.set(counter.get() + 1), |_| {})
            .unwrap();

        advance_to(&mut scheduler, &clock, 10_000_000_000);
        assert_eq!(terminated.get(), 1);
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert_eq!(handle.count(CommandKind::MidLevelStop), 1);
        assert_eq!(handle.delivered(CommandKind::MidLevelStop)[0].at_nanos, 3_000_000_000);
        assert!(scheduler.session().active_channels().is_empty());
    }

    #[test]
    fn test_busy_while_running() {
        let (mut scheduler, _, _) = scheduler();
        scheduler.start(Duration::from_secs(2), || {}, |_| {}).unwrap();
        let pulse = PulseConfig::new(ChannelId::new(2).unwrap(), 2.0, 700, 500, 20.0).unwrap();
        assert_eq!(scheduler.configure_pulse(&pulse), Err(StimulatorError::Busy));
        assert!(scheduler.session_mut().is_none());

        assert_eq!(scheduler.stop(), Ok(true));
        assert!(scheduler.session_mut().is_some());
        assert_eq!(scheduler.stop(), Ok(false));
    }

    #[test]
    fn test_failed_stop_is_escalated() {
        let (mut scheduler, handle, _) = scheduler();
        scheduler.start(Duration::from_secs(5), || {}, |_| {}).unwrap();
        handle.set_command_failure(CommandKind::MidLevelStop, true);

        assert!(matches!(scheduler.stop(), Err(StimulatorError::StopFailed { .. })));
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert_eq!(scheduler.next_deadline(), None);
    }

    #[test]
    fn test_keepalive_failure_does_not_abort() {
        let (mut scheduler, handle, clock) = scheduler();
        let terminated = Rc::new(Cell::new(false));
        let flag = terminated.clone();
        handle.set_command_failure(CommandKind::MidLevelGetCurrentData, true);
        scheduler
            .start(Duration::from_secs(4), move || flag.set(true), |_| {})
            .unwrap();

        advance_to(&mut scheduler, &clock, 2_000_000_000);
        assert_eq!(scheduler.state(), SchedulerState::Running);
        advance_to(&mut scheduler, &clock, 5_000_000_000);
        assert!(terminated.get());
    }
}
