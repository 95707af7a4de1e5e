// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Polling state machine
//!
//! Every poll target cycles between [`PollState::Reading`] and
//! [`PollState::WaitingResponse`]. An activation never blocks: it
//! consumes completions that have been relayed since the last
//! activation and submits at most one new request to the master.

use tokio::sync::watch;

use crate::{
    error::SubmitError,
    frame::Request,
    master::{Completion, MasterHandle, Outcome, RequestHandle},
    relay::{CompletionRecord, CompletionRelay, Wake, NO_FUNCTION_CODE},
    scheduler::Alarm,
    slave::Slave,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollState {
    /// Ready to submit the next request.
    #[default]
    Reading,

    /// A request has been submitted and not been consumed yet.
    WaitingResponse,
}

/// A device and the read request that is issued to it periodically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub slave: Slave,
    pub request: Request,
}

impl Target {
    #[must_use]
    pub const fn new(slave: Slave, request: Request) -> Self {
        Self { slave, request }
    }
}

impl Default for Target {
    /// A single holding register at address 0 of slave 2.
    fn default() -> Self {
        Self::new(Slave(2), Request::ReadHoldingRegisters(0x0000, 1))
    }
}

/// Number of activations a target sits out after an unsuccessful cycle.
///
/// The default polls again immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    /// After a timeout or transport failure.
    pub failure_holdoff: u32,

    /// After an exception response.
    pub exception_holdoff: u32,
}

/// Counters of a single poll target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollStats {
    pub submitted: u64,
    pub responses: u64,
    pub exceptions: u64,
    pub failures: u64,
    pub busy: u64,
}

#[derive(Debug)]
struct TargetState {
    target: Target,
    state: PollState,
    relay: CompletionRelay,
    pending: Option<RequestHandle>,
    holdoff: u32,
    last_completion: Option<Completion>,
    stats: PollStats,
}

impl TargetState {
    fn new(target: Target, wake: &Wake) -> Self {
        Self {
            target,
            state: PollState::Reading,
            relay: CompletionRelay::new(wake.clone()),
            pending: None,
            holdoff: 0,
            last_completion: None,
            stats: PollStats::default(),
        }
    }

    fn consume(&mut self, policy: &RetryPolicy) {
        if self.relay.function_code() == NO_FUNCTION_CODE {
            // Spurious wake or periodic activation
            return;
        }
        let Some(completion) = self.relay.take() else {
            return;
        };
        debug_assert_eq!(self.pending, Some(completion.handle));
        self.holdoff = match &completion.outcome {
            Outcome::Response(_) => {
                self.stats.responses += 1;
                0
            }
            Outcome::Exception(exception) => {
                self.stats.exceptions += 1;
                log::debug!(
                    "Slave {} rejected {:?}: {exception}",
                    self.target.slave,
                    self.target.request
                );
                policy.exception_holdoff
            }
            Outcome::Failed(failure) => {
                self.stats.failures += 1;
                log::debug!(
                    "Request {} for slave {} failed: {failure}",
                    completion.handle,
                    self.target.slave
                );
                policy.failure_holdoff
            }
        };
        self.pending = None;
        self.last_completion = Some(completion);
        self.state = PollState::Reading;
    }

    fn submit(&mut self, master: &MasterHandle) -> Result<RequestHandle, SubmitError> {
        self.relay.reset();
        let Target { slave, request } = self.target;
        let handle = master.submit(slave, request, self.relay.callback())?;
        self.pending = Some(handle);
        self.stats.submitted += 1;
        self.state = PollState::WaitingResponse;
        Ok(handle)
    }
}

/// Polls a table of targets through a shared master.
#[derive(Debug)]
pub struct Poller {
    master: MasterHandle,
    wake: Wake,
    targets: Vec<TargetState>,
    cursor: usize,
    policy: RetryPolicy,
}

impl Poller {
    pub fn new(master: MasterHandle, targets: impl IntoIterator<Item = Target>) -> Self {
        let wake = Wake::new();
        let targets = targets
            .into_iter()
            .map(|target| TargetState::new(target, &wake))
            .collect();
        Self {
            master,
            wake,
            targets,
            cursor: 0,
            policy: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Signalled whenever a completion has been relayed.
    #[must_use]
    pub fn wake(&self) -> Wake {
        self.wake.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    #[must_use]
    pub fn target(&self, index: usize) -> Option<&Target> {
        self.targets.get(index).map(|target| &target.target)
    }

    #[must_use]
    pub fn state(&self, index: usize) -> Option<PollState> {
        self.targets.get(index).map(|target| target.state)
    }

    /// A snapshot of the completion record of a target.
    #[must_use]
    pub fn record(&self, index: usize) -> Option<CompletionRecord> {
        self.targets.get(index).map(|target| target.relay.record())
    }

    /// The most recently consumed completion of a target.
    #[must_use]
    pub fn last_completion(&self, index: usize) -> Option<&Completion> {
        self.targets
            .get(index)
            .and_then(|target| target.last_completion.as_ref())
    }

    #[must_use]
    pub fn stats(&self, index: usize) -> Option<PollStats> {
        self.targets.get(index).map(|target| target.stats)
    }

    /// Runs an activation for a poll alarm tick.
    ///
    /// Targets that finish their cycle in this activation are submitted
    /// again in a later one. Each call counts down the holdoff of targets
    /// that sit out after an unsuccessful cycle.
    pub fn activate(&mut self) {
        self.run_activation(true);
    }

    /// Runs an activation for a relayed completion.
    ///
    /// Same as [`Poller::activate()`] but leaves holdoffs untouched, so
    /// completions of other targets don't shorten them.
    pub fn activate_on_wake(&mut self) {
        self.run_activation(false);
    }

    fn run_activation(&mut self, alarm_tick: bool) {
        let policy = self.policy;
        let mut ready = Vec::with_capacity(self.targets.len());
        for (index, target) in self.targets.iter_mut().enumerate() {
            match target.state {
                PollState::Reading if target.holdoff > 0 => {
                    if alarm_tick {
                        target.holdoff -= 1;
                    }
                }
                PollState::Reading => ready.push(index),
                PollState::WaitingResponse => target.consume(&policy),
            }
        }
        self.submit_next(&ready);
    }

    // The master accepts a single request, the ready targets take turns.
    fn submit_next(&mut self, ready: &[usize]) {
        if self.targets.iter().any(|target| target.pending.is_some()) {
            // The master is still busy with a request of our own
            return;
        }
        let cursor = self.cursor;
        let Some(&index) = ready
            .iter()
            .find(|&&index| index >= cursor)
            .or_else(|| ready.first())
        else {
            return;
        };
        let target = &mut self.targets[index];
        match target.submit(&self.master) {
            Ok(_) => {
                self.cursor = index + 1;
            }
            Err(err) => {
                target.stats.busy += 1;
                log::debug!("Postponing request for slave {}: {err}", target.target.slave);
            }
        }
    }

    /// Activates on every alarm tick and on every relayed completion
    /// until `shutdown` turns `true` or its sender is dropped.
    pub async fn run_until(mut self, alarm: Alarm, mut shutdown: watch::Receiver<bool>) -> Self {
        let mut interval = alarm.interval();
        let wake = self.wake();
        while !*shutdown.borrow() {
            tokio::select! {
                _ = interval.tick() => self.activate(),
                () = wake.wait() => self.activate_on_wake(),
                res = shutdown.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
            }
        }
        log::debug!("Poller stopped");
        self
    }
}
