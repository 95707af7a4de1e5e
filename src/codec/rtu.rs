// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::io::{self, Cursor, Error, ErrorKind};

use byteorder::{BigEndian, ReadBytesExt as _};
use bytes::{Buf as _, BufMut as _, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    frame::serial::{Header, RequestAdu, ResponseAdu},
    slave::{Slave, SlaveId},
};

use super::{decode_response_pdu, encode_request_pdu, READ_REQUEST_PDU_SIZE};

/// Length of the CRC trailer.
const CRC_LEN: usize = 2;

// [slave, function, crc]
#[cfg(test)]
const MIN_ADU_LEN: usize = 1 + 1 + CRC_LEN;

fn get_response_pdu_len(adu_buf: &BytesMut) -> io::Result<Option<usize>> {
    let Some(&fn_code) = adu_buf.get(1) else {
        // incomplete frame
        return Ok(None);
    };
    let pdu_len = match fn_code {
        0x01..=0x04 => {
            let Some(&byte_count) = adu_buf.get(2) else {
                // incomplete frame
                return Ok(None);
            };
            2 + usize::from(byte_count)
        }
        0x81..=0xFF => 2,
        _ => {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("invalid function code: 0x{fn_code:02X}"),
            ));
        }
    };
    Ok(Some(pdu_len))
}

/// CRC-16/MODBUS with the bytes swapped for big-endian encoding.
pub(crate) fn calc_crc(data: &[u8]) -> u16 {
    let mut crc = 0xFFFF;
    for x in data {
        crc ^= u16::from(*x);
        for _ in 0..8 {
            let crc_odd = (crc & 0x0001) != 0;
            crc >>= 1;
            if crc_odd {
                crc ^= 0xA001;
            }
        }
    }
    crc << 8 | crc >> 8
}

/// Splits RTU frames off the receive buffer.
///
/// Bytes that can't start a valid frame are skipped one at a time
/// until the decoder is back in sync.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct FrameDecoder {
    dropped_bytes: Vec<u8>,
}

impl FrameDecoder {
    fn drop_first_byte(&mut self, buf: &mut BytesMut) {
        self.dropped_bytes.push(buf[0]);
        buf.advance(1);
    }

    fn recover(&mut self) {
        if self.dropped_bytes.is_empty() {
            return;
        }
        log::warn!(
            "Skipped {} byte(s) before the next valid RTU frame: {:02X?}",
            self.dropped_bytes.len(),
            self.dropped_bytes
        );
        self.dropped_bytes.clear();
    }

    pub(crate) fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<(SlaveId, Bytes)>> {
        loop {
            let pdu_len = match get_response_pdu_len(buf) {
                Ok(Some(pdu_len)) => pdu_len,
                Ok(None) => return Ok(None),
                Err(err) => {
                    log::debug!("Dropping first byte: {err}");
                    self.drop_first_byte(buf);
                    continue;
                }
            };

            let adu_len = 1 + pdu_len + CRC_LEN;
            if buf.len() < adu_len {
                // incomplete frame
                return Ok(None);
            }

            let crc_offset = adu_len - CRC_LEN;
            let crc = Cursor::new(&buf[crc_offset..adu_len]).read_u16::<BigEndian>()?;
            let expected_crc = calc_crc(&buf[..crc_offset]);
            if crc != expected_crc {
                log::debug!(
                    "Dropping first byte: CRC is not correct: {crc:04X} instead of {expected_crc:04X}"
                );
                self.drop_first_byte(buf);
                continue;
            }

            self.recover();
            let mut adu = buf.split_to(adu_len);
            adu.truncate(crc_offset);
            let slave_id = adu[0];
            let pdu_data = adu.split_off(1).freeze();
            return Ok(Some((slave_id, pdu_data)));
        }
    }
}

/// _Modbus_ RTU client codec.
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
        buf.reserve(1 + READ_REQUEST_PDU_SIZE + CRC_LEN);
        let start = buf.len();
        buf.put_u8(hdr.slave.into());
        encode_request_pdu(buf, &pdu);
        let crc = calc_crc(&buf[start..]);
        buf.put_u16(crc);
        Ok(())
    }
}
