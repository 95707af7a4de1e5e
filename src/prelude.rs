// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types

pub use crate::{
    config::Config,
    gateway::Gateway,
    master::{Completion, Failure, Master, MasterConfig, MasterHandle, Outcome},
    poll::{PollState, PollStats, Poller, RetryPolicy, Target},
    relay::{CompletionRelay, Wake},
    scheduler::Alarm,
    session::Session,
    transport::{FramingMode, Transport},
    ExceptionCode, Request, Response, Slave, SlaveId,
};

#[cfg(feature = "serial")]
pub use crate::transport::open_serial;
