// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Serial line ADUs, shared by the RTU and ASCII framings.

use super::*;

use crate::{error::ProtocolError, slave::Slave};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Header {
    pub(crate) slave: Slave,
}

/// What the master needs to remember for matching a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct RequestContext {
    pub(crate) function_code: FunctionCode,
    pub(crate) header: Header,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RequestAdu {
    pub(crate) hdr: Header,
    pub(crate) pdu: RequestPdu,
}

impl RequestAdu {
    pub(crate) fn new(slave: Slave, request: Request) -> Self {
        Self {
            hdr: Header { slave },
            pdu: request.into(),
        }
    }

    pub(crate) fn context(&self) -> RequestContext {
        RequestContext {
            function_code: self.pdu.0.function_code(),
            header: self.hdr,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResponseAdu {
    pub(crate) hdr: Header,
    pub(crate) pdu: ResponsePdu,
}

impl ResponseAdu {
    /// Matches the response against the request it is supposed to answer.
    pub(crate) fn try_into_result(
        self,
        request_context: RequestContext,
    ) -> Result<Result<Response, ExceptionCode>, ProtocolError> {
        let RequestContext {
            function_code: req_function_code,
            header: req_hdr,
        } = request_context;

        let ResponseAdu {
            hdr: rsp_hdr,
            pdu: rsp_pdu,
        } = self;
        let rsp_function_code = rsp_pdu.function_code();
        let ResponsePdu(result) = rsp_pdu;

        if let Err(message) = verify_response_header(&req_hdr, &rsp_hdr) {
            return Err(ProtocolError::HeaderMismatch { message, result });
        }

        if req_function_code != rsp_function_code {
            return Err(ProtocolError::FunctionCodeMismatch {
                request: req_function_code,
                result,
            });
        }

        Ok(result.map_err(
            |ExceptionResponse {
                 function: _,
                 exception,
             }| exception,
        ))
    }
}
