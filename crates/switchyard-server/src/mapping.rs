//! Static error kind to transport signal tables.
//!
//! Unrecognized errors report [`ErrorKind::Internal`], so they land on the
//! generic internal signal of each table.

use http::StatusCode;
use switchyard_core::ErrorKind;

/// HTTP status for an error kind.
pub const fn http_status(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
        ErrorKind::NotAcceptable => StatusCode::NOT_ACCEPTABLE,
        ErrorKind::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
        ErrorKind::LengthRequired => StatusCode::LENGTH_REQUIRED,
        ErrorKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        ErrorKind::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Terminal signal of a queue delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueSignal {
    /// Positive acknowledgement.
    Ack,
    /// Negative acknowledgement.
    Reject {
        /// Put the message back on the queue.
        requeue: bool,
    },
}

/// Queue signal for a failed delivery of the given kind.
///
/// Only a timeout is worth another attempt; every other failure would fail
/// the same way again.
pub const fn queue_signal(kind: ErrorKind) -> QueueSignal {
    match kind {
        ErrorKind::RequestTimeout => QueueSignal::Reject { requeue: true },
        _ => QueueSignal::Reject { requeue: false },
    }
}
