// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A periodic [Modbus](https://en.wikipedia.org/wiki/Modbus) master poller
//! based on [tokio](https://tokio.rs).
//!
//! A [`Poller`](poll::Poller) repeatedly submits read requests to a
//! [`Master`](master::Master) without ever blocking on the device. A
//! [`Gateway`](gateway::Gateway) pump, driven by its own alarm, moves
//! the requests over an RTU or ASCII serial line, matches the responses
//! and resolves each request exactly once, either with the data, with
//! the exception reported by the device or with a failure. The
//! completion is relayed back and wakes the poller.
//!
//! ## Installation
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! tokio-modbus-poll = { version = "*", features = ["serial"] }
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! # async fn run(port: impl tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static)
//! # -> tokio_modbus_poll::Result<()> {
//! use tokio_modbus_poll::prelude::*;
//!
//! let config = Config::default()
//!     .with_framing(FramingMode::Rtu)
//!     .with_targets([Target::new(Slave(1), Request::ReadInputRegisters(0x1000, 2))]);
//! let session = Session::spawn(&config, port)?;
//! // ...
//! let poller = session.shutdown().await?;
//! println!("{:?}", poller.last_completion(0));
//! # Ok(())
//! # }
//! ```

pub mod prelude;

pub mod config;
pub mod error;
pub mod gateway;
pub mod master;
pub mod poll;
pub mod relay;
pub mod scheduler;
pub mod session;
pub mod transport;

mod codec;
mod frame;
mod slave;

pub use self::{
    error::{Error, Result},
    frame::{
        Address, Coil, ExceptionCode, ExceptionResponse, FunctionCode, Quantity, Request,
        Response, Word, MAX_READ_BITS, MAX_READ_REGISTERS,
    },
    slave::{Slave, SlaveId},
};
