// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{
    convert::TryFrom,
    io::{self, BufRead as _, Cursor, Error, ErrorKind},
};

use byteorder::{BigEndian, ReadBytesExt as _};
use bytes::{BufMut as _, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    frame::{
        serial::{RequestAdu, ResponseAdu},
        Coil, ExceptionCode, ExceptionResponse, FunctionCode, RequestPdu, Response, ResponsePdu,
    },
    transport::FramingMode,
};

pub(crate) mod ascii;
pub(crate) mod rtu;

/// Maximum request/response PDU size.
///
/// The same for RTU and ASCII framing.
const MAX_PDU_SIZE: usize = 253;

/// Size of an encoded read request PDU: function code, address, quantity.
const READ_REQUEST_PDU_SIZE: usize = 5;

fn encode_request_pdu(buf: &mut BytesMut, request: &RequestPdu) {
    let RequestPdu(request) = request;
    buf.reserve(READ_REQUEST_PDU_SIZE);
    buf.put_u8(request.function_code().value());
    buf.put_u16(request.address());
    buf.put_u16(request.quantity());
}

fn read_u16_be(reader: &mut impl io::Read) -> io::Result<u16> {
    reader.read_u16::<BigEndian>()
}

#[allow(clippy::cast_possible_truncation)]
fn has_remaining(rdr: &Cursor<&Bytes>) -> bool {
    (rdr.position() as usize) < rdr.get_ref().len()
}

fn read_byte_count(rdr: &mut Cursor<&Bytes>, bytes: &Bytes) -> io::Result<usize> {
    let byte_count = usize::from(rdr.read_u8()?);
    if bytes.len() < 2 + byte_count {
        return Err(Error::new(ErrorKind::InvalidData, "too short"));
    }
    Ok(byte_count)
}

fn read_words(rdr: &mut Cursor<&Bytes>, bytes: &Bytes) -> io::Result<Vec<u16>> {
    let byte_count = read_byte_count(rdr, bytes)?;
    if byte_count % 2 != 0 {
        return Err(Error::new(ErrorKind::InvalidData, "invalid quantity"));
    }
    let quantity = byte_count / 2;
    let mut data = Vec::with_capacity(quantity);
    for _ in 0..quantity {
        data.push(read_u16_be(rdr)?);
    }
    Ok(data)
}

fn read_packed_coils(rdr: &mut Cursor<&Bytes>, bytes: &Bytes) -> io::Result<Vec<Coil>> {
    let byte_count = read_byte_count(rdr, bytes)?;
    let packed_coils = &bytes[2..2 + byte_count];
    rdr.consume(byte_count);
    // The exact requested quantity is unknown here, so the
    // whole bytes are unpacked.
    Ok(decode_packed_coils(packed_coils))
}

impl TryFrom<Bytes> for Response {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        use crate::frame::Response::*;
        if bytes.len() > MAX_PDU_SIZE {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "response PDU size exceeded",
            ));
        }
        let rdr = &mut Cursor::new(&bytes);
        let fn_code = rdr.read_u8()?;
        let rsp = match FunctionCode::new(fn_code) {
            FunctionCode::ReadCoils => ReadCoils(read_packed_coils(rdr, &bytes)?),
            FunctionCode::ReadDiscreteInputs => {
                ReadDiscreteInputs(read_packed_coils(rdr, &bytes)?)
            }
            FunctionCode::ReadHoldingRegisters => ReadHoldingRegisters(read_words(rdr, &bytes)?),
            FunctionCode::ReadInputRegisters => ReadInputRegisters(read_words(rdr, &bytes)?),
            FunctionCode::Custom(fn_code) => {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("unsupported function code: 0x{fn_code:02X}"),
                ));
            }
        };
        // Verify that all data has been consumed and decoded.
        if has_remaining(rdr) {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "undecoded response data",
            ));
        }
        Ok(rsp)
    }
}

impl TryFrom<Bytes> for ExceptionResponse {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        let mut rdr = Cursor::new(&bytes);
        let fn_err_code = rdr.read_u8()?;
        if fn_err_code < 0x80 {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "Invalid exception function code",
            ));
        }
        let function = fn_err_code - 0x80;
        let exception = ExceptionCode::new(rdr.read_u8()?);
        Ok(ExceptionResponse {
            function: FunctionCode::new(function),
            exception,
        })
    }
}

impl TryFrom<Bytes> for ResponsePdu {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        let fn_code = Cursor::new(&bytes).read_u8()?;
        let pdu = if fn_code < 0x80 {
            Response::try_from(bytes)?.into()
        } else {
            ExceptionResponse::try_from(bytes)?.into()
        };
        Ok(pdu)
    }
}

fn decode_packed_coils(bytes: &[u8]) -> Vec<Coil> {
    let count = bytes.len() * 8;
    let mut res = Vec::with_capacity(count);
    for i in 0..count {
        res.push((bytes[i / 8] >> (i % 8)) & 0b1 > 0);
    }
    res
}

/// Client side codec for the configured serial line framing.
#[derive(Debug)]
pub(crate) enum ClientCodec {
    Rtu(rtu::ClientCodec),
    Ascii(ascii::ClientCodec),
}

impl ClientCodec {
    pub(crate) fn new(mode: FramingMode) -> Self {
        match mode {
            FramingMode::Rtu => Self::Rtu(rtu::ClientCodec::default()),
            FramingMode::Ascii => Self::Ascii(ascii::ClientCodec::default()),
        }
    }
}

impl Decoder for ClientCodec {
    type Item = ResponseAdu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<ResponseAdu>> {
        match self {
            Self::Rtu(codec) => codec.decode(buf),
            Self::Ascii(codec) => codec.decode(buf),
        }
    }
}

impl Encoder<RequestAdu> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, adu: RequestAdu, buf: &mut BytesMut) -> io::Result<()> {
        match self {
            Self::Rtu(codec) => codec.encode(adu, buf),
            Self::Ascii(codec) => codec.encode(adu, buf),
        }
    }
}

/// Decodes the PDU of a frame that already passed its checksum.
///
/// Undecodable PDUs are logged and skipped.
fn decode_response_pdu(slave_id: u8, pdu_data: Bytes) -> Option<ResponsePdu> {
    match ResponsePdu::try_from(pdu_data) {
        Ok(pdu) => Some(pdu),
        Err(err) => {
            log::warn!("Discarding undecodable response from slave 0x{slave_id:0>2X}: {err}");
            None
        }
    }
}
