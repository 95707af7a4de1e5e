// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Periodic alarms driving the pump and poll tasks.

use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// A periodic alarm: first expiry after `initial_delay`, then every `period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alarm {
    pub initial_delay: Duration,
    pub period: Duration,
}

impl Alarm {
    #[must_use]
    pub const fn new(initial_delay: Duration, period: Duration) -> Self {
        Self {
            initial_delay,
            period,
        }
    }

    /// Starts the alarm.
    ///
    /// Late ticks are not made up for.
    ///
    /// # Panics
    ///
    /// Panics if `period` is zero.
    #[must_use]
    pub fn interval(&self) -> Interval {
        let mut interval = interval_at(Instant::now() + self.initial_delay, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    }
}
