// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A simulated slave device on the far end of an in-memory serial line.

#![allow(dead_code)]

use futures_util::FutureExt as _;
use tokio::io::{duplex, AsyncReadExt as _, AsyncWriteExt as _, DuplexStream};
use tokio_modbus_poll::prelude::*;

/// A decoded read request as seen by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub slave: u8,
    pub function: u8,
    pub address: u16,
    pub quantity: u16,
}

pub struct Device {
    stream: DuplexStream,
    framing: FramingMode,
}

/// Returns the master end of the line and the device.
pub fn connect(framing: FramingMode) -> (DuplexStream, Device) {
    connect_with_capacity(framing, 1024)
}

/// Like [`connect()`], the line buffers at most `capacity` bytes
/// in each direction.
pub fn connect_with_capacity(framing: FramingMode, capacity: usize) -> (DuplexStream, Device) {
    let (master, device) = duplex(capacity);
    let device = Device {
        stream: device,
        framing,
    };
    (master, device)
}

fn crc(data: &[u8]) -> [u8; 2] {
    let mut crc: u16 = 0xFFFF;
    for byte in data {
        crc ^= u16::from(*byte);
        for _ in 0..8 {
            let odd = crc & 0x0001 != 0;
            crc >>= 1;
            if odd {
                crc ^= 0xA001;
            }
        }
    }
    crc.to_le_bytes()
}

fn lrc(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |sum, byte| sum.wrapping_add(*byte))
        .wrapping_neg()
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'A'..=b'F' => digit - b'A' + 10,
        _ => panic!("unexpected hex digit {digit:#04X}"),
    }
}

impl Device {
    pub fn framing(&self) -> FramingMode {
        self.framing
    }

    /// Waits for the next request frame.
    pub async fn read_request(&mut self) -> ReadRequest {
        let data = match self.framing {
            FramingMode::Rtu => {
                let mut frame = [0; 8];
                self.stream.read_exact(&mut frame).await.unwrap();
                assert_eq!(crc(&frame[..6]), [frame[6], frame[7]], "CRC");
                frame[..6].to_vec()
            }
            FramingMode::Ascii => {
                // ':' + 2 * (6 + 1) hex digits + CRLF
                let mut frame = [0; 17];
                self.stream.read_exact(&mut frame).await.unwrap();
                assert_eq!(frame[0], b':');
                assert_eq!(&frame[15..], b"\r\n");
                let data: Vec<u8> = frame[1..15]
                    .chunks(2)
                    .map(|pair| hex_value(pair[0]) << 4 | hex_value(pair[1]))
                    .collect();
                assert_eq!(lrc(&data[..6]), data[6], "LRC");
                data[..6].to_vec()
            }
        };
        ReadRequest {
            slave: data[0],
            function: data[1],
            address: u16::from_be_bytes([data[2], data[3]]),
            quantity: u16::from_be_bytes([data[4], data[5]]),
        }
    }

    /// `true` if the master has written anything that hasn't been read.
    pub fn has_pending_input(&mut self) -> bool {
        let mut buf = [0; 1];
        match self.stream.read(&mut buf).now_or_never() {
            Some(Ok(n)) => n > 0,
            Some(Err(_)) | None => false,
        }
    }

    /// Sends the slave address and PDU with the framing of the line.
    pub async fn send(&mut self, adu: &[u8]) {
        let frame = match self.framing {
            FramingMode::Rtu => {
                let mut frame = adu.to_vec();
                frame.extend_from_slice(&crc(adu));
                frame
            }
            FramingMode::Ascii => {
                let mut frame = String::from(":");
                for byte in adu.iter().copied().chain(std::iter::once(lrc(adu))) {
                    frame.push_str(&format!("{byte:02X}"));
                }
                frame.push_str("\r\n");
                frame.into_bytes()
            }
        };
        self.stream.write_all(&frame).await.unwrap();
    }

    pub async fn respond_registers(&mut self, req: ReadRequest, values: &[u16]) {
        let mut adu = vec![req.slave, req.function, (values.len() * 2) as u8];
        for value in values {
            adu.extend_from_slice(&value.to_be_bytes());
        }
        self.send(&adu).await;
    }

    pub async fn respond_exception(&mut self, req: ReadRequest, exception: ExceptionCode) {
        self.send(&[req.slave, req.function | 0x80, exception.value()])
            .await;
    }

    /// Closes the line.
    pub fn disconnect(self) {
        drop(self.stream);
    }
}
