//! Character set decoding and encoding.

use bytes::Bytes;
use switchyard_core::{codes, RpcError, RpcResult};

/// A supported character set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    /// UTF-8.
    Utf8,
    /// 7-bit US-ASCII.
    Ascii,
    /// ISO-8859-1.
    Latin1,
}

impl Charset {
    /// Looks up a charset label, case-insensitively.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Some(Self::Utf8),
            "us-ascii" | "ascii" => Some(Self::Ascii),
            "iso-8859-1" | "latin1" | "latin-1" => Some(Self::Latin1),
            _ => None,
        }
    }
}

/// Decodes request bytes. Failures are bad-input errors.
pub fn decode(raw: &[u8], label: &str) -> RpcResult<String> {
    let charset = Charset::from_label(label)
        .ok_or_else(|| RpcError::bad_request(format!("unsupported charset {label}")))?;
    match charset {
        Charset::Utf8 => std::str::from_utf8(raw)
            .map(str::to_string)
            .map_err(|e| RpcError::bad_body(codes::INVALID_BODY, format!("invalid utf-8: {e}"))),
        Charset::Ascii => {
            if raw.is_ascii() {
                Ok(raw.iter().map(|b| char::from(*b)).collect())
            } else {
                Err(RpcError::bad_body(codes::INVALID_BODY, "body is not ascii"))
            }
        }
        Charset::Latin1 => Ok(raw.iter().map(|b| char::from(*b)).collect()),
    }
}

/// Encodes response text. Failures are internal errors.
pub fn encode(text: &str, label: &str) -> RpcResult<Bytes> {
    let charset = Charset::from_label(label)
        .ok_or_else(|| RpcError::internal(format!("unsupported response charset {label}")))?;
    match charset {
        Charset::Utf8 => Ok(Bytes::copy_from_slice(text.as_bytes())),
        Charset::Ascii if text.is_ascii() => Ok(Bytes::copy_from_slice(text.as_bytes())),
        Charset::Ascii => Err(RpcError::internal("response is not representable in ascii")),
        Charset::Latin1 => text
            .chars()
            .map(|c| u8::try_from(u32::from(c)))
            .collect::<Result<Vec<u8>, _>>()
            .map(Bytes::from)
            .map_err(|_| RpcError::internal("response is not representable in latin1")),
    }
}
