// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types.

use std::io;

use thiserror::Error;
use tokio::task::JoinError;

use crate::{
    frame::{ExceptionResponse, FunctionCode, Quantity, Response},
    master::RequestHandle,
    slave::Slave,
};

/// A request could not be submitted to the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// Another request has not been completed yet.
    #[error("request {outstanding} for slave {slave} is still outstanding")]
    Busy {
        outstanding: RequestHandle,
        slave: Slave,
    },
}

/// A received response that doesn't answer the outstanding request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The response was sent by another slave.
    #[error("mismatching headers: {message} {result:?}")]
    HeaderMismatch {
        message: String,
        result: std::result::Result<Response, ExceptionResponse>,
    },

    /// The response is for another function.
    #[error("mismatching function codes: {request} {result:?}")]
    FunctionCodeMismatch {
        request: FunctionCode,
        result: std::result::Result<Response, ExceptionResponse>,
    },

    /// The response carries fewer items than requested.
    #[error("mismatching quantity: requested {requested}, received {received}")]
    QuantityMismatch {
        requested: Quantity,
        received: usize,
    },
}

/// Errors returned to the host process.
#[derive(Debug, Error)]
pub enum Error {
    /// The configuration can't be used for polling.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The serial port or stream can't be used.
    #[error(transparent)]
    Transport(#[from] io::Error),

    /// A session task panicked or was cancelled.
    #[error(transparent)]
    Task(#[from] JoinError),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use crate::frame::ExceptionCode;

    use super::*;

    #[test]
    fn carry_mismatching_result() {
        let err = ProtocolError::FunctionCodeMismatch {
            request: FunctionCode::ReadHoldingRegisters,
            result: Ok(Response::ReadInputRegisters(vec![1])),
        };
        assert!(err.to_string().starts_with("mismatching function codes"));

        let err = ProtocolError::HeaderMismatch {
            message: "slave 0x03 != 0x02".to_owned(),
            result: Err(ExceptionResponse {
                function: FunctionCode::ReadCoils,
                exception: ExceptionCode::IllegalDataAddress,
            }),
        };
        assert_eq!(err.clone(), err);
    }
}
