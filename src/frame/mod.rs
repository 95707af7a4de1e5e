// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

pub(crate) mod serial;

use std::{
    error,
    fmt::{self, Display},
};

/// A Modbus function code.
///
/// Only the read functions are named, every other code is carried
/// through as [`FunctionCode::Custom`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCode {
    /// 01 (0x01) Read Coils.
    ReadCoils,

    /// 02 (0x02) Read Discrete Inputs
    ReadDiscreteInputs,

    /// 03 (0x03) Read Holding Registers
    ReadHoldingRegisters,

    /// 04 (0x04) Read Input Registers
    ReadInputRegisters,

    /// Any other function code.
    Custom(u8),
}

impl FunctionCode {
    /// Create a new [`FunctionCode`] with `value`.
    #[must_use]
    pub const fn new(value: u8) -> Self {
        match value {
            0x01 => Self::ReadCoils,
            0x02 => Self::ReadDiscreteInputs,
            0x03 => Self::ReadHoldingRegisters,
            0x04 => Self::ReadInputRegisters,
            code => Self::Custom(code),
        }
    }

    /// Gets the [`u8`] value of the current [`FunctionCode`].
    #[must_use]
    pub const fn value(self) -> u8 {
        match self {
            Self::ReadCoils => 0x01,
            Self::ReadDiscreteInputs => 0x02,
            Self::ReadHoldingRegisters => 0x03,
            Self::ReadInputRegisters => 0x04,
            Self::Custom(code) => code,
        }
    }
}

impl Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value().fmt(f)
    }
}

/// A Modbus protocol address is represented by 16 bit from `0` to `65535`.
///
/// This *protocol address* uses 0-based indexing. Register numbers from
/// device manuals are often 1-based and need to be converted first.
pub type Address = u16;

/// A Coil represents a single bit.
pub type Coil = bool;

/// Modbus uses 16 bit for its data items.
///
/// Transmitted using a big-endian representation.
pub type Word = u16;

/// Number of items to process.
pub type Quantity = u16;

/// Maximum number of coils or discrete inputs per read request.
pub const MAX_READ_BITS: Quantity = 2000;

/// Maximum number of registers per read request.
pub const MAX_READ_REGISTERS: Quantity = 125;

/// A read request from the client (master) to the server (slave).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// Read `Quantity` coils starting at `Address`.
    ReadCoils(Address, Quantity),

    /// Read `Quantity` discrete inputs starting at `Address`.
    ReadDiscreteInputs(Address, Quantity),

    /// Read `Quantity` holding registers starting at `Address`.
    ReadHoldingRegisters(Address, Quantity),

    /// Read `Quantity` input registers starting at `Address`.
    ReadInputRegisters(Address, Quantity),
}

impl Request {
    /// Get the [`FunctionCode`] of the [`Request`].
    #[must_use]
    pub const fn function_code(&self) -> FunctionCode {
        use Request::*;

        match self {
            ReadCoils(_, _) => FunctionCode::ReadCoils,
            ReadDiscreteInputs(_, _) => FunctionCode::ReadDiscreteInputs,
            ReadHoldingRegisters(_, _) => FunctionCode::ReadHoldingRegisters,
            ReadInputRegisters(_, _) => FunctionCode::ReadInputRegisters,
        }
    }

    /// The address of the first item to read.
    #[must_use]
    pub const fn address(&self) -> Address {
        use Request::*;

        match *self {
            ReadCoils(address, _)
            | ReadDiscreteInputs(address, _)
            | ReadHoldingRegisters(address, _)
            | ReadInputRegisters(address, _) => address,
        }
    }

    /// The number of items to read.
    #[must_use]
    pub const fn quantity(&self) -> Quantity {
        use Request::*;

        match *self {
            ReadCoils(_, quantity)
            | ReadDiscreteInputs(_, quantity)
            | ReadHoldingRegisters(_, quantity)
            | ReadInputRegisters(_, quantity) => quantity,
        }
    }

    /// The largest quantity the protocol allows for this kind of request.
    #[must_use]
    pub const fn max_quantity(&self) -> Quantity {
        use Request::*;

        match self {
            ReadCoils(_, _) | ReadDiscreteInputs(_, _) => MAX_READ_BITS,
            ReadHoldingRegisters(_, _) | ReadInputRegisters(_, _) => MAX_READ_REGISTERS,
        }
    }
}

/// The data of a successful read request.
///
/// ReadCoils/ReadDiscreteInputs: After decoding the length of the Vec is
/// a multiple of 8. The master truncates it to the requested quantity
/// before handing it out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// The coil values that have been read.
    ReadCoils(Vec<Coil>),

    /// The discrete input values that have been read.
    ReadDiscreteInputs(Vec<Coil>),

    /// The holding register values that have been read.
    ReadHoldingRegisters(Vec<Word>),

    /// The input register values that have been read.
    ReadInputRegisters(Vec<Word>),
}

impl Response {
    /// Get the [`FunctionCode`] of the [`Response`].
    #[must_use]
    pub const fn function_code(&self) -> FunctionCode {
        use Response::*;

        match self {
            ReadCoils(_) => FunctionCode::ReadCoils,
            ReadDiscreteInputs(_) => FunctionCode::ReadDiscreteInputs,
            ReadHoldingRegisters(_) => FunctionCode::ReadHoldingRegisters,
            ReadInputRegisters(_) => FunctionCode::ReadInputRegisters,
        }
    }

    /// The register values, if this is a register read.
    #[must_use]
    pub fn registers(&self) -> Option<&[Word]> {
        match self {
            Response::ReadHoldingRegisters(words) | Response::ReadInputRegisters(words) => {
                Some(words)
            }
            Response::ReadCoils(_) | Response::ReadDiscreteInputs(_) => None,
        }
    }

    /// The bit values, if this is a coil or discrete input read.
    #[must_use]
    pub fn bits(&self) -> Option<&[Coil]> {
        match self {
            Response::ReadCoils(coils) | Response::ReadDiscreteInputs(coils) => Some(coils),
            Response::ReadHoldingRegisters(_) | Response::ReadInputRegisters(_) => None,
        }
    }

    /// Number of items carried by the response.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Response::ReadCoils(coils) | Response::ReadDiscreteInputs(coils) => coils.len(),
            Response::ReadHoldingRegisters(words) | Response::ReadInputRegisters(words) => {
                words.len()
            }
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A server (slave) exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    /// 0x01
    IllegalFunction,
    /// 0x02
    IllegalDataAddress,
    /// 0x03
    IllegalDataValue,
    /// 0x04
    ServerDeviceFailure,
    /// 0x05
    Acknowledge,
    /// 0x06
    ServerDeviceBusy,
    /// 0x08
    MemoryParityError,
    /// 0x0A
    GatewayPathUnavailable,
    /// 0x0B
    GatewayTargetDevice,
    /// None of the above.
    ///
    /// Prefer [`Self::new()`] for creating exception codes from raw bytes.
    Custom(u8),
}

impl ExceptionCode {
    /// Create a new [`ExceptionCode`] with `value`.
    #[must_use]
    pub const fn new(value: u8) -> Self {
        use ExceptionCode::*;

        match value {
            0x01 => IllegalFunction,
            0x02 => IllegalDataAddress,
            0x03 => IllegalDataValue,
            0x04 => ServerDeviceFailure,
            0x05 => Acknowledge,
            0x06 => ServerDeviceBusy,
            0x08 => MemoryParityError,
            0x0A => GatewayPathUnavailable,
            0x0B => GatewayTargetDevice,
            other => Custom(other),
        }
    }

    /// Gets the [`u8`] value of the current [`ExceptionCode`].
    #[must_use]
    pub const fn value(self) -> u8 {
        use ExceptionCode::*;

        match self {
            IllegalFunction => 0x01,
            IllegalDataAddress => 0x02,
            IllegalDataValue => 0x03,
            ServerDeviceFailure => 0x04,
            Acknowledge => 0x05,
            ServerDeviceBusy => 0x06,
            MemoryParityError => 0x08,
            GatewayPathUnavailable => 0x0A,
            GatewayTargetDevice => 0x0B,
            Custom(code) => code,
        }
    }

    fn description(self) -> &'static str {
        use ExceptionCode::*;

        match self {
            IllegalFunction => "Illegal function",
            IllegalDataAddress => "Illegal data address",
            IllegalDataValue => "Illegal data value",
            ServerDeviceFailure => "Server device failure",
            Acknowledge => "Acknowledge",
            ServerDeviceBusy => "Server device busy",
            MemoryParityError => "Memory parity error",
            GatewayPathUnavailable => "Gateway path unavailable",
            GatewayTargetDevice => "Gateway target device failed to respond",
            Custom(_) => "Custom",
        }
    }
}

impl From<ExceptionCode> for u8 {
    fn from(from: ExceptionCode) -> Self {
        from.value()
    }
}

/// A server (slave) exception response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionResponse {
    pub function: FunctionCode,
    pub exception: ExceptionCode,
}

/// Represents a message from the client (master) to the server (slave).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RequestPdu(pub(crate) Request);

impl From<Request> for RequestPdu {
    fn from(from: Request) -> Self {
        RequestPdu(from)
    }
}

/// Represents a message from the server (slave) to the client (master).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResponsePdu(pub(crate) Result<Response, ExceptionResponse>);

impl ResponsePdu {
    pub(crate) fn function_code(&self) -> FunctionCode {
        match &self.0 {
            Ok(response) => response.function_code(),
            Err(ExceptionResponse { function, .. }) => *function,
        }
    }
}

impl From<Response> for ResponsePdu {
    fn from(from: Response) -> Self {
        ResponsePdu(Ok(from))
    }
}

impl From<ExceptionResponse> for ResponsePdu {
    fn from(from: ExceptionResponse) -> Self {
        ResponsePdu(Err(from))
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl error::Error for ExceptionCode {}

impl fmt::Display for ExceptionResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modbus function {}: {}", self.function, self.exception)
    }
}

impl error::Error for ExceptionResponse {}

/// Check that `req_hdr` is the same `Header` as `rsp_hdr`.
///
/// # Errors
///
/// If the 2 headers are different, an error message with the details will be returned.
pub(crate) fn verify_response_header<H: Eq + fmt::Debug>(
    req_hdr: &H,
    rsp_hdr: &H,
) -> Result<(), String> {
    if req_hdr != rsp_hdr {
        return Err(format!(
            "expected/request = {req_hdr:?}, actual/response = {rsp_hdr:?}"
        ));
    }
    Ok(())
}
