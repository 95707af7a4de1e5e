// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Master request engine
//!
//! The engine owns at most one outstanding request. Submitting is
//! synchronous and never waits for the device, the request is handed
//! to the transport by the [gateway pump](crate::gateway::Gateway) which
//! also advances the response timeout and resolves the request.

use std::{
    fmt, io,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use thiserror::Error;

use crate::{
    error::{ProtocolError, SubmitError},
    frame::{
        serial::{RequestAdu, ResponseAdu},
        Coil, ExceptionCode, FunctionCode, Request, Response,
    },
    slave::Slave,
};

/// Function code reported by [`Completion::function_code()`] when the
/// request could not be completed.
pub const FAILED_FUNCTION_CODE: u8 = 0xFF;

/// Invoked exactly once when a submitted request is resolved.
pub type Callback = Box<dyn FnOnce(Completion) + Send + 'static>;

/// Identifies a submitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestHandle(u64);

impl fmt::Display for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why a request could not be completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Failure {
    #[error("no response within the timeout")]
    Timeout,

    #[error("transport error: {0:?}")]
    Transport(io::ErrorKind),

    #[error("transport disconnected")]
    Disconnected,
}

/// Result of a resolved request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The device answered with the requested data.
    Response(Response),

    /// The device answered with an exception.
    Exception(ExceptionCode),

    /// No answer could be obtained.
    Failed(Failure),
}

/// Handed to the [`Callback`] of a resolved request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub handle: RequestHandle,
    pub slave: Slave,
    pub function: FunctionCode,
    pub outcome: Outcome,
}

impl Completion {
    /// The echoed function code, or [`FAILED_FUNCTION_CODE`].
    #[must_use]
    pub fn function_code(&self) -> u8 {
        match self.outcome {
            Outcome::Response(_) | Outcome::Exception(_) => self.function.value(),
            Outcome::Failed(_) => FAILED_FUNCTION_CODE,
        }
    }

    /// The exception code reported by the device, `0` otherwise.
    #[must_use]
    pub fn exception_code(&self) -> u8 {
        match self.outcome {
            Outcome::Exception(exception) => exception.value(),
            Outcome::Response(_) | Outcome::Failed(_) => 0,
        }
    }

    #[must_use]
    pub fn response(&self) -> Option<&Response> {
        match &self.outcome {
            Outcome::Response(response) => Some(response),
            Outcome::Exception(_) | Outcome::Failed(_) => None,
        }
    }

    #[must_use]
    pub fn failure(&self) -> Option<Failure> {
        match self.outcome {
            Outcome::Failed(failure) => Some(failure),
            Outcome::Response(_) | Outcome::Exception(_) => None,
        }
    }
}

/// Timeout and retry counters of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterConfig {
    /// Number of pump invocations to wait for a response.
    pub response_timeout_ticks: u32,

    /// Number of times a request is re-sent after a timeout.
    pub retries: u32,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            response_timeout_ticks: 60,
            retries: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Waiting for the pump to hand the request to the transport.
    Queued,

    /// Waiting for the response.
    Sent { ticks_left: u32 },
}

struct Outstanding {
    handle: RequestHandle,
    adu: RequestAdu,
    retries_left: u32,
    phase: Phase,
    callback: Callback,
}

impl fmt::Debug for Outstanding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outstanding")
            .field("handle", &self.handle)
            .field("adu", &self.adu)
            .field("retries_left", &self.retries_left)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

/// A resolved request whose callback has not been invoked yet.
///
/// Must be fired after the engine has been unlocked.
#[must_use]
pub(crate) struct Resolution {
    callback: Callback,
    completion: Completion,
}

impl Resolution {
    #[cfg(test)]
    pub(crate) fn completion(&self) -> &Completion {
        &self.completion
    }

    pub(crate) fn fire(self) {
        let Self {
            callback,
            completion,
        } = self;
        callback(completion);
    }
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolution")
            .field("completion", &self.completion)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct Master {
    config: MasterConfig,
    next_handle: u64,
    slot: Option<Outstanding>,
}

impl Master {
    #[must_use]
    pub fn new(config: MasterConfig) -> Self {
        Self {
            config,
            next_handle: 0,
            slot: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    /// `true` while a submitted request has not been resolved.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.slot.is_some()
    }

    #[must_use]
    pub fn outstanding(&self) -> Option<RequestHandle> {
        self.slot.as_ref().map(|outstanding| outstanding.handle)
    }

    /// Queues a read request for the transport.
    ///
    /// Returns immediately. `callback` is invoked exactly once when the
    /// request has been answered, rejected by the device or has failed.
    ///
    /// # Errors
    ///
    /// Fails with [`SubmitError::Busy`] if another request is outstanding.
    /// The callback is dropped without being invoked in this case.
    pub fn submit<F>(
        &mut self,
        slave: Slave,
        request: Request,
        callback: F,
    ) -> Result<RequestHandle, SubmitError>
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        if let Some(outstanding) = &self.slot {
            return Err(SubmitError::Busy {
                outstanding: outstanding.handle,
                slave: outstanding.adu.hdr.slave,
            });
        }
        let handle = RequestHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        log::debug!("Submitting request {handle} for slave {slave}: {request:?}");
        self.slot = Some(Outstanding {
            handle,
            adu: RequestAdu::new(slave, request),
            retries_left: self.config.retries,
            phase: Phase::Queued,
            callback: Box::new(callback),
        });
        Ok(handle)
    }

    /// Takes the queued request for sending and starts its timeout.
    pub(crate) fn poll_transmit(&mut self) -> Option<RequestAdu> {
        let outstanding = self.slot.as_mut()?;
        if outstanding.phase != Phase::Queued {
            return None;
        }
        outstanding.phase = Phase::Sent {
            ticks_left: self.config.response_timeout_ticks,
        };
        log::debug!("Sending request {}", outstanding.handle);
        Some(outstanding.adu)
    }

    /// Matches a received frame against the outstanding request.
    ///
    /// Frames that don't answer the outstanding request are ignored.
    pub(crate) fn on_response(&mut self, rsp_adu: ResponseAdu) -> Option<Resolution> {
        let Some(outstanding) = &self.slot else {
            log::warn!(
                "Ignoring unsolicited response from slave {}",
                rsp_adu.hdr.slave
            );
            return None;
        };
        let request = outstanding.adu.pdu.0;
        let outcome = match rsp_adu
            .try_into_result(outstanding.adu.context())
            .and_then(|result| match result {
                Ok(rsp) => check_quantity(&request, rsp).map(Outcome::Response),
                Err(exception) => Ok(Outcome::Exception(exception)),
            }) {
            Ok(outcome) => outcome,
            Err(err) => {
                log::warn!("Ignoring response for request {}: {err}", outstanding.handle);
                return None;
            }
        };
        self.resolve(outcome)
    }

    /// Advances the response timeout of a sent request by one pump tick.
    pub(crate) fn tick(&mut self) -> Option<Resolution> {
        let outstanding = self.slot.as_mut()?;
        let Phase::Sent { ticks_left } = &mut outstanding.phase else {
            return None;
        };
        *ticks_left = ticks_left.saturating_sub(1);
        if *ticks_left > 0 {
            return None;
        }
        if outstanding.retries_left > 0 {
            outstanding.retries_left -= 1;
            outstanding.phase = Phase::Queued;
            log::warn!(
                "Request {} timed out, {} retries left",
                outstanding.handle,
                outstanding.retries_left
            );
            return None;
        }
        log::warn!("Request {} timed out", outstanding.handle);
        self.resolve(Outcome::Failed(Failure::Timeout))
    }

    pub(crate) fn on_transport_error(&mut self, err: &io::Error) -> Option<Resolution> {
        log::warn!("Transport error: {err}");
        self.resolve(Outcome::Failed(Failure::Transport(err.kind())))
    }

    pub(crate) fn on_disconnected(&mut self) -> Option<Resolution> {
        self.resolve(Outcome::Failed(Failure::Disconnected))
    }

    fn resolve(&mut self, outcome: Outcome) -> Option<Resolution> {
        let Outstanding {
            handle,
            adu,
            callback,
            ..
        } = self.slot.take()?;
        let completion = Completion {
            handle,
            slave: adu.hdr.slave,
            function: adu.pdu.0.function_code(),
            outcome,
        };
        log::debug!("Request {handle} resolved: {:?}", completion.outcome);
        Some(Resolution {
            callback,
            completion,
        })
    }
}

impl Default for Master {
    fn default() -> Self {
        Self::new(MasterConfig::default())
    }
}

fn check_quantity(request: &Request, response: Response) -> Result<Response, ProtocolError> {
    let requested = request.quantity();
    let received = response.len();
    let mismatch = || ProtocolError::QuantityMismatch {
        requested,
        received,
    };
    let quantity = usize::from(requested);
    match response {
        Response::ReadCoils(bits) => truncate_bits(bits, quantity)
            .map(Response::ReadCoils)
            .ok_or_else(mismatch),
        Response::ReadDiscreteInputs(bits) => truncate_bits(bits, quantity)
            .map(Response::ReadDiscreteInputs)
            .ok_or_else(mismatch),
        rsp @ (Response::ReadHoldingRegisters(_) | Response::ReadInputRegisters(_)) => {
            if received == quantity {
                Ok(rsp)
            } else {
                Err(mismatch())
            }
        }
    }
}

// Bits are received packed into whole bytes.
fn truncate_bits(mut bits: Vec<Coil>, quantity: usize) -> Option<Vec<Coil>> {
    if bits.len() < quantity || bits.len() >= quantity + 8 {
        return None;
    }
    bits.truncate(quantity);
    Some(bits)
}

/// Shared access to a [`Master`] for the poll and pump tasks.
#[derive(Debug, Clone, Default)]
pub struct MasterHandle(Arc<Mutex<Master>>);

impl MasterHandle {
    #[must_use]
    pub fn new(master: Master) -> Self {
        Self(Arc::new(Mutex::new(master)))
    }

    /// See [`Master::submit()`].
    ///
    /// # Errors
    ///
    /// Fails with [`SubmitError::Busy`] if another request is outstanding.
    pub fn submit<F>(
        &self,
        slave: Slave,
        request: Request,
        callback: F,
    ) -> Result<RequestHandle, SubmitError>
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        self.lock().submit(slave, request, callback)
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.lock().is_busy()
    }

    #[must_use]
    pub fn outstanding(&self) -> Option<RequestHandle> {
        self.lock().outstanding()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Master> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
