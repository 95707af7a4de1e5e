// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Completion relay between the master engine and the poller.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::{
    master::{Callback, Completion},
    slave::Slave,
};

/// Function code of a [`CompletionRecord`] that holds no completion.
pub const NO_FUNCTION_CODE: u8 = 0x00;

/// Wakes the poll task.
///
/// At most one wake-up is stored while the poll task is not waiting,
/// repeated signals are coalesced.
#[derive(Debug, Clone, Default)]
pub struct Wake(Arc<Notify>);

impl Wake {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        self.0.notify_one();
    }

    pub async fn wait(&self) {
        self.0.notified().await;
    }
}

/// The most recent completion of a poll target, if not consumed yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionRecord {
    completion: Option<Completion>,
}

impl CompletionRecord {
    #[must_use]
    pub fn completion(&self) -> Option<&Completion> {
        self.completion.as_ref()
    }

    #[must_use]
    pub fn slave(&self) -> Option<Slave> {
        self.completion.as_ref().map(|completion| completion.slave)
    }

    /// [`NO_FUNCTION_CODE`] while empty.
    #[must_use]
    pub fn function_code(&self) -> u8 {
        self.completion
            .as_ref()
            .map_or(NO_FUNCTION_CODE, Completion::function_code)
    }

    #[must_use]
    pub fn exception_code(&self) -> u8 {
        self.completion
            .as_ref()
            .map_or(0, Completion::exception_code)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.completion.is_none()
    }
}

/// Stores completions reported by the master and wakes the poller.
#[derive(Debug, Clone)]
pub struct CompletionRelay {
    record: Arc<Mutex<CompletionRecord>>,
    wake: Wake,
}

impl CompletionRelay {
    #[must_use]
    pub fn new(wake: Wake) -> Self {
        Self {
            record: Default::default(),
            wake,
        }
    }

    /// Stores `completion` and then signals the wake.
    pub fn on_complete(&self, completion: Completion) {
        let previous = self.lock().completion.replace(completion);
        if let Some(previous) = previous {
            log::warn!(
                "Overwriting unconsumed completion of request {}",
                previous.handle
            );
        }
        self.wake.signal();
    }

    /// A master callback that reports to this relay.
    #[must_use]
    pub fn callback(&self) -> Callback {
        let relay = self.clone();
        Box::new(move |completion| relay.on_complete(completion))
    }

    /// Clears the record before a new request is submitted.
    pub fn reset(&self) {
        self.lock().completion = None;
    }

    #[must_use]
    pub fn record(&self) -> CompletionRecord {
        self.lock().clone()
    }

    #[must_use]
    pub fn function_code(&self) -> u8 {
        self.lock().function_code()
    }

    /// Consumes the stored completion.
    pub fn take(&self) -> Option<Completion> {
        self.lock().completion.take()
    }

    fn lock(&self) -> MutexGuard<'_, CompletionRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
