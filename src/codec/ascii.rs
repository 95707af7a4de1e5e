// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::io::{self, Error, ErrorKind};

use bytes::{Buf as _, BufMut as _, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    frame::serial::{Header, RequestAdu, ResponseAdu},
    slave::{Slave, SlaveId},
};

use super::{decode_response_pdu, encode_request_pdu, MAX_PDU_SIZE, READ_REQUEST_PDU_SIZE};

const FRAME_START: u8 = b':';

const FRAME_END: &[u8] = b"\r\n";

// [start, hex(slave, pdu, lrc), end]
const MAX_FRAME_LEN: usize = 1 + 2 * (1 + MAX_PDU_SIZE + 1) + FRAME_END.len();

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Longitudinal redundancy check: two's complement of the byte sum.
pub(crate) fn calc_lrc(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |sum, byte| sum.wrapping_add(*byte))
        .wrapping_neg()
}

fn hex_nibble(digit: u8) -> io::Result<u8> {
    match digit {
        b'0'..=b'9' => Ok(digit - b'0'),
        b'A'..=b'F' => Ok(digit - b'A' + 10),
        b'a'..=b'f' => Ok(digit - b'a' + 10),
        _ => Err(Error::new(
            ErrorKind::InvalidData,
            format!("invalid hex digit: 0x{digit:02X}"),
        )),
    }
}

fn put_hex(buf: &mut BytesMut, byte: u8) {
    buf.put_u8(HEX_DIGITS[usize::from(byte >> 4)]);
    buf.put_u8(HEX_DIGITS[usize::from(byte & 0x0F)]);
}

/// Decodes the hex digits between start and end marker.
fn decode_frame_content(hex: &[u8]) -> io::Result<(SlaveId, Bytes)> {
    // slave, function, lrc
    if hex.len() % 2 != 0 || hex.len() < 2 * 3 {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!("invalid frame length: {}", hex.len()),
        ));
    }
    let mut data = BytesMut::with_capacity(hex.len() / 2);
    for pair in hex.chunks_exact(2) {
        data.put_u8(hex_nibble(pair[0])? << 4 | hex_nibble(pair[1])?);
    }
    let lrc_offset = data.len() - 1;
    let lrc = data[lrc_offset];
    data.truncate(lrc_offset);
    let expected_lrc = calc_lrc(&data);
    if lrc != expected_lrc {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!("LRC is not correct: {lrc:02X} instead of {expected_lrc:02X}"),
        ));
    }
    let slave_id = data[0];
    let pdu_data = data.split_off(1).freeze();
    Ok((slave_id, pdu_data))
}

/// Splits ASCII frames off the receive buffer.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct FrameDecoder {
    dropped_bytes: usize,
}

impl FrameDecoder {
    fn drop_bytes(&mut self, buf: &mut BytesMut, count: usize) {
        self.dropped_bytes += count;
        buf.advance(count);
    }

    fn recover(&mut self) {
        if self.dropped_bytes == 0 {
            return;
        }
        log::warn!(
            "Skipped {} byte(s) before the next valid ASCII frame",
            self.dropped_bytes
        );
        self.dropped_bytes = 0;
    }

    pub(crate) fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<(SlaveId, Bytes)>> {
        loop {
            let Some(start) = buf.iter().position(|&byte| byte == FRAME_START) else {
                let len = buf.len();
                self.drop_bytes(buf, len);
                return Ok(None);
            };
            self.drop_bytes(buf, start);

            let Some(end) = buf
                .windows(FRAME_END.len())
                .position(|window| window == FRAME_END)
            else {
                if buf.len() > MAX_FRAME_LEN {
                    self.drop_bytes(buf, 1);
                    continue;
                }
                // incomplete frame
                return Ok(None);
            };

            let frame = buf.split_to(end + FRAME_END.len());
            // A start marker within the frame restarts it.
            let content_start = frame[..end]
                .iter()
                .rposition(|&byte| byte == FRAME_START)
                .map_or(1, |pos| pos + 1);
            match decode_frame_content(&frame[content_start..end]) {
                Ok(decoded) => {
                    self.recover();
                    return Ok(Some(decoded));
                }
                Err(err) => {
                    log::debug!("Dropping ASCII frame: {err}");
                    self.dropped_bytes += frame.len();
                }
            }
        }
    }
}

/// _Modbus_ ASCII client codec.
#[derive(Debug, Default)]
pub(crate) struct ClientCodec {
    decoder: FrameDecoder,
}

impl Decoder for ClientCodec {
    type Item = ResponseAdu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<ResponseAdu>> {
        loop {
            let Some((slave_id, pdu_data)) = self.decoder.decode(buf)? else {
                return Ok(None);
            };
            if let Some(pdu) = decode_response_pdu(slave_id, pdu_data) {
                let hdr = Header {
                    slave: Slave(slave_id),
                };
                return Ok(Some(ResponseAdu { hdr, pdu }));
            }
        }
    }
}

impl Encoder<RequestAdu> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, adu: RequestAdu, buf: &mut BytesMut) -> io::Result<()> {
        let RequestAdu { hdr, pdu } = adu;
        let mut data = BytesMut::with_capacity(1 + READ_REQUEST_PDU_SIZE);
        data.put_u8(hdr.slave.into());
        encode_request_pdu(&mut data, &pdu);
        let lrc = calc_lrc(&data);

        buf.reserve(1 + 2 * (data.len() + 1) + FRAME_END.len());
        buf.put_u8(FRAME_START);
        for byte in &data {
            put_hex(buf, *byte);
        }
        put_hex(buf, lrc);
        buf.put_slice(FRAME_END);
        Ok(())
    }
}
