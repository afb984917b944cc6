// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Connection-fatal transport errors.

use crate::varint::VarInt;
use core::fmt;
use quill_codec::DecoderError;

//= https://www.rfc-editor.org/rfc/rfc9000#section-20
//# QUIC transport error codes and application error codes are 62-bit
//# unsigned integers.

/// A QUIC connection error carrying an RFC 9000 §20 code
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Error {
    pub code: VarInt,
    pub frame_type: Option<VarInt>,
    pub reason: &'static str,
}

impl Error {
    pub const fn new(code: VarInt, reason: &'static str) -> Self {
        Self {
            code,
            frame_type: None,
            reason,
        }
    }

    pub const fn with_frame_type(mut self, frame_type: VarInt) -> Self {
        self.frame_type = Some(frame_type);
        self
    }

    pub const fn with_reason(mut self, reason: &'static str) -> Self {
        self.reason = reason;
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "TransportError({})", self.code)
        } else {
            f.write_str(self.reason)
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

macro_rules! def_error {
    ($doc:expr, $name:ident, $code:expr) => {
        impl Error {
            #[doc = $doc]
            pub const $name: VarInt = VarInt::from_u32($code);
        }
    };
}

def_error!(
    "The connection is being closed abruptly in the absence of any error.",
    NO_ERROR,
    0x0
);
def_error!(
    "The endpoint encountered an internal error and cannot continue with the connection.",
    INTERNAL_ERROR,
    0x1
);
def_error!(
    "An endpoint received more data than it permitted in its advertised data limits.",
    FLOW_CONTROL_ERROR,
    0x3
);
def_error!(
    "An endpoint received a frame for a stream identifier that exceeded its advertised stream limit.",
    STREAM_LIMIT_ERROR,
    0x4
);
def_error!(
    "An endpoint received a frame for a stream that was not in a state that permitted that frame.",
    STREAM_STATE_ERROR,
    0x5
);
def_error!(
    "An endpoint received data inconsistent with an established final size.",
    FINAL_SIZE_ERROR,
    0x6
);
def_error!(
    "An endpoint received a frame that was badly formatted.",
    FRAME_ENCODING_ERROR,
    0x7
);
def_error!(
    "An endpoint received transport parameters that were badly formatted or invalid.",
    TRANSPORT_PARAMETER_ERROR,
    0x8
);
def_error!(
    "An endpoint detected a protocol compliance error not covered by a more specific code.",
    PROTOCOL_VIOLATION,
    0xA
);

/// Creates a transport `Error` from a named code with an optional reason
#[macro_export]
macro_rules! transport_error {
    ($error:ident) => {
        $crate::transport::Error::new($crate::transport::Error::$error, "")
    };
    ($error:ident, $reason:expr) => {
        $crate::transport::Error::new($crate::transport::Error::$error, $reason)
    };
}

impl From<DecoderError> for Error {
    fn from(error: DecoderError) -> Self {
        match error {
            DecoderError::UnexpectedEof { .. } => {
                transport_error!(FRAME_ENCODING_ERROR, "unexpected end of frame")
            }
            DecoderError::InvariantViolation(reason) => {
                Error::new(Error::FRAME_ENCODING_ERROR, reason)
            }
        }
    }
}

impl From<crate::varint::VarIntError> for Error {
    fn from(_: crate::varint::VarIntError) -> Self {
        transport_error!(INTERNAL_ERROR, "varint range exceeded")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_reason_when_present() {
        let error = transport_error!(FLOW_CONTROL_ERROR, "stream limit overflow");
        assert_eq!(error.to_string(), "stream limit overflow");
        let bare = transport_error!(PROTOCOL_VIOLATION);
        assert_eq!(bare.to_string(), "TransportError(10)");
    }
}
