// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transport adapter between the gateway pump and a byte stream.

use std::io;

use futures_util::{FutureExt as _, SinkExt as _, StreamExt as _};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

#[cfg(feature = "serial")]
use crate::error::{Error, Result};
use crate::{
    codec::ClientCodec,
    frame::serial::{RequestAdu, ResponseAdu},
};

/// Serial line framing of the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingMode {
    /// Binary framing, terminated by a CRC-16.
    Rtu,

    /// Printable framing: `:` hex digits, LRC and CRLF.
    Ascii,
}

/// Framed serial transport.
///
/// Neither sending nor receiving waits for the stream.
#[derive(Debug)]
pub struct Transport<T> {
    framed: Framed<T, ClientCodec>,
    mode: FramingMode,
    closed: bool,
}

impl<T> Transport<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps `stream` with the codec for `mode`.
    pub fn open(stream: T, mode: FramingMode) -> Self {
        let framed = Framed::new(stream, ClientCodec::new(mode));
        Self {
            framed,
            mode,
            closed: false,
        }
    }

    #[must_use]
    pub fn mode(&self) -> FramingMode {
        self.mode
    }

    /// `false` after the peer closed the stream.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.closed
    }

    /// Queues `adu` in the write buffer without waiting for the stream.
    ///
    /// Bytes of an earlier request that are still unflushed are discarded.
    pub(crate) fn start_send(&mut self, adu: RequestAdu) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        }
        // Leftovers of earlier exchanges must not be matched
        // against the new request.
        self.framed.read_buffer_mut().clear();
        let stale = self.framed.write_buffer().len();
        if stale > 0 {
            log::debug!("Discarding {stale} unsent byte(s) of a previous request");
            self.framed.write_buffer_mut().clear();
        }
        match self.framed.feed(adu).now_or_never() {
            Some(res) => res,
            None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
        }
    }

    /// Writes as much of the write buffer as the stream accepts right now.
    ///
    /// Returns `None` while bytes are left over.
    pub(crate) fn try_flush(&mut self) -> Option<io::Result<()>> {
        if self.closed || self.framed.write_buffer().is_empty() {
            return Some(Ok(()));
        }
        self.framed.flush().now_or_never()
    }

    /// `true` while queued bytes haven't been written to the stream.
    #[must_use]
    pub fn has_unsent(&self) -> bool {
        !self.framed.write_buffer().is_empty()
    }

    /// Returns the next complete response frame, if any has been received.
    ///
    /// Yields a `BrokenPipe` error once when the peer has closed the stream.
    pub(crate) fn try_recv(&mut self) -> Option<io::Result<ResponseAdu>> {
        if self.closed {
            return None;
        }
        match self.framed.next().now_or_never()? {
            Some(res) => Some(res),
            None => {
                self.closed = true;
                Some(Err(io::Error::from(io::ErrorKind::BrokenPipe)))
            }
        }
    }
}

/// Opens a serial port with the default line settings (8N1, no flow control).
///
/// # Errors
///
/// Fails with [`Error::Transport`] if the port doesn't exist or can't be
/// configured.
#[cfg(feature = "serial")]
pub fn open_serial(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
    let builder = tokio_serial::new(path, baud_rate);
    let port = tokio_serial::SerialStream::open(&builder).map_err(io::Error::from)?;
    Ok(port)
}
