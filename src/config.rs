// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Polling session configuration.

use std::time::Duration;

use crate::{
    error::{Error, Result},
    master::MasterConfig,
    poll::{RetryPolicy, Target},
    scheduler::Alarm,
    transport::FramingMode,
};

/// Device and timing parameters of a polling session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub framing: FramingMode,

    /// Polled in turn, at most one request is outstanding at a time.
    pub targets: Vec<Target>,

    /// Drives the gateway pump.
    pub pump_alarm: Alarm,

    /// Drives the poller.
    pub poll_alarm: Alarm,

    pub response_timeout: Duration,

    /// Re-sends after a timeout before the request fails.
    pub retries: u32,

    pub retry_policy: RetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            framing: FramingMode::Ascii,
            targets: vec![Target::default()],
            pump_alarm: Alarm::new(Duration::from_millis(5), Duration::from_millis(5)),
            poll_alarm: Alarm::new(Duration::from_millis(10), Duration::from_millis(500)),
            response_timeout: Duration::from_millis(300),
            retries: 0,
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl Config {
    #[must_use]
    pub fn with_framing(mut self, framing: FramingMode) -> Self {
        self.framing = framing;
        self
    }

    /// Replaces the target table.
    #[must_use]
    pub fn with_targets(mut self, targets: impl IntoIterator<Item = Target>) -> Self {
        self.targets = targets.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_pump_alarm(mut self, pump_alarm: Alarm) -> Self {
        self.pump_alarm = pump_alarm;
        self
    }

    #[must_use]
    pub fn with_poll_alarm(mut self, poll_alarm: Alarm) -> Self {
        self.poll_alarm = poll_alarm;
        self
    }

    #[must_use]
    pub fn with_response_timeout(mut self, response_timeout: Duration) -> Self {
        self.response_timeout = response_timeout;
        self
    }

    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Checks that the configuration can be used for polling.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.targets.is_empty() {
            return Err(Error::Config("no poll targets".to_owned()));
        }
        for Target { slave, request } in &self.targets {
            if !slave.is_single_device() {
                return Err(Error::Config(format!(
                    "slave {slave} can't be polled"
                )));
            }
            let quantity = request.quantity();
            if quantity == 0 || quantity > request.max_quantity() {
                return Err(Error::Config(format!(
                    "invalid quantity {quantity} for slave {slave}, expected 1..={}",
                    request.max_quantity()
                )));
            }
        }
        if self.pump_alarm.period.is_zero() || self.poll_alarm.period.is_zero() {
            return Err(Error::Config("alarm period must not be zero".to_owned()));
        }
        if self.response_timeout.is_zero() {
            return Err(Error::Config(
                "response timeout must not be zero".to_owned(),
            ));
        }
        Ok(())
    }

    /// Converts the response timeout into pump ticks, rounded up.
    #[must_use]
    pub fn master_config(&self) -> MasterConfig {
        let period = self.pump_alarm.period.as_nanos().max(1);
        let ticks = (self.response_timeout.as_nanos() + period - 1) / period;
        MasterConfig {
            response_timeout_ticks: u32::try_from(ticks).unwrap_or(u32::MAX).max(1),
            retries: self.retries,
        }
    }
}
