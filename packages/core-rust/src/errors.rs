//! Structured, transport-neutral errors.
//!
//! An [`Error`] is created where a call fails, travels unchanged through the
//! middleware chain, and is translated exactly once at the transport boundary.
//! The numeric [`Code`] uses the canonical gRPC status numbering so the RPC
//! mapping is the identity; the HTTP mapping goes through [`Code::http_status`].

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::middleware::BoxError;

/// Well-known reasons produced by the runtime itself.
pub mod reason {
    /// Failure that is not a structured error, or a recovered panic.
    pub const UNKNOWN: &str = "Unknown";
    /// The call deadline elapsed before the handler finished.
    pub const DEADLINE_EXCEEDED: &str = "DeadlineExceeded";
    /// The call was cancelled by the caller.
    pub const CANCELLED: &str = "Cancelled";
    /// The request or response could not be decoded or encoded.
    pub const CODEC: &str = "CodecError";
    /// The server is shutting down and rejects new calls.
    pub const SERVER_DRAINING: &str = "ServerDraining";
    /// No route or method is registered for the call.
    pub const NOT_FOUND: &str = "NotFound";
    /// An outbound call named a method that is not `/package.Service/Method`.
    pub const INVALID_METHOD: &str = "InvalidMethod";

    /// Default reason for a bare native status that carried no structured details.
    #[must_use]
    pub fn for_code(code: super::Code) -> &'static str {
        match code {
            super::Code::DeadlineExceeded => DEADLINE_EXCEEDED,
            super::Code::Cancelled => CANCELLED,
            _ => UNKNOWN,
        }
    }
}

// ---------------------------------------------------------------------------
// Code
// ---------------------------------------------------------------------------

/// Protocol-neutral status code.
///
/// Discriminants match the canonical gRPC codes, so every value has a valid
/// representation on both the HTTP and RPC boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
#[repr(i32)]
pub enum Code {
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl Code {
    /// All codes, in numeric order.
    pub const ALL: [Code; 16] = [
        Code::Cancelled,
        Code::Unknown,
        Code::InvalidArgument,
        Code::DeadlineExceeded,
        Code::NotFound,
        Code::AlreadyExists,
        Code::PermissionDenied,
        Code::ResourceExhausted,
        Code::FailedPrecondition,
        Code::Aborted,
        Code::OutOfRange,
        Code::Unimplemented,
        Code::Internal,
        Code::Unavailable,
        Code::DataLoss,
        Code::Unauthenticated,
    ];

    /// Integer value of the code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// HTTP status for this code.
    #[must_use]
    pub fn http_status(self) -> u16 {
        match self {
            Code::Cancelled => 499,
            Code::Unknown | Code::Internal | Code::DataLoss => 500,
            Code::InvalidArgument | Code::FailedPrecondition | Code::OutOfRange => 400,
            Code::DeadlineExceeded => 504,
            Code::NotFound => 404,
            Code::AlreadyExists | Code::Aborted => 409,
            Code::PermissionDenied => 403,
            Code::ResourceExhausted => 429,
            Code::Unimplemented => 501,
            Code::Unavailable => 503,
            Code::Unauthenticated => 401,
        }
    }

    /// Best-effort reverse of [`Code::http_status`].
    ///
    /// Statuses shared by several codes resolve to the most common one;
    /// unlisted statuses coarsen to their class.
    #[must_use]
    pub fn from_http_status(status: u16) -> Code {
        match status {
            400 => Code::InvalidArgument,
            401 => Code::Unauthenticated,
            403 => Code::PermissionDenied,
            404 => Code::NotFound,
            408 | 504 => Code::DeadlineExceeded,
            409 => Code::Aborted,
            429 => Code::ResourceExhausted,
            499 => Code::Cancelled,
            501 => Code::Unimplemented,
            503 => Code::Unavailable,
            400..=499 => Code::InvalidArgument,
            500..=599 => Code::Internal,
            _ => Code::Unknown,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl From<Code> for i32 {
    fn from(code: Code) -> Self {
        code.as_i32()
    }
}

/// Returned when an integer is outside the known code range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid status code: {0}")]
pub struct InvalidCode(pub i32);

impl TryFrom<i32> for Code {
    type Error = InvalidCode;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        usize::try_from(value - 1)
            .ok()
            .and_then(|idx| Code::ALL.get(idx).copied())
            .ok_or(InvalidCode(value))
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Structured error carried across every transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("error: code = {code} reason = {reason} message = {message}")]
pub struct Error {
    code: Code,
    reason: String,
    message: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    metadata: HashMap<String, String>,
}

macro_rules! constructors {
    ($($(#[$doc:meta])* $name:ident => $code:ident;)*) => {
        $(
            $(#[$doc])*
            #[must_use]
            pub fn $name(reason: impl Into<String>, message: impl Into<String>) -> Self {
                Self::new(Code::$code, reason, message)
            }
        )*
    };
}

impl Error {
    /// Creates an error. Never fails; the code is translated later at the boundary.
    #[must_use]
    pub fn new(code: Code, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            message: message.into(),
            metadata: HashMap::new(),
        }
    }

    constructors! {
        /// The caller cancelled the operation.
        cancelled => Cancelled;
        /// Failure with no more specific classification.
        unknown => Unknown;
        /// The client supplied an invalid argument.
        invalid_argument => InvalidArgument;
        /// The deadline elapsed before the operation completed.
        deadline_exceeded => DeadlineExceeded;
        /// A requested entity was not found.
        not_found => NotFound;
        /// The entity the client tried to create already exists.
        already_exists => AlreadyExists;
        /// The caller lacks permission.
        permission_denied => PermissionDenied;
        /// A quota or resource limit was hit.
        resource_exhausted => ResourceExhausted;
        /// The system is not in the state required for the operation.
        failed_precondition => FailedPrecondition;
        /// The operation was aborted, typically by a concurrency conflict.
        aborted => Aborted;
        /// The operation was attempted past the valid range.
        out_of_range => OutOfRange;
        /// The operation is not implemented.
        unimplemented => Unimplemented;
        /// An internal invariant was broken.
        internal => Internal;
        /// The service is currently unavailable.
        unavailable => Unavailable;
        /// Unrecoverable data loss or corruption.
        data_loss => DataLoss;
        /// The request lacks valid authentication credentials.
        unauthenticated => Unauthenticated;
    }

    /// Attaches a metadata entry, replacing any previous value for `key`.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Replaces all metadata.
    #[must_use]
    pub fn with_metadata_map(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn code(&self) -> Code {
        self.code
    }

    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// Converts any handler error into a structured one.
    ///
    /// Structured errors pass through unchanged, an elapsed timer becomes
    /// `DeadlineExceeded`, and everything else maps to `Internal`/`Unknown`.
    #[must_use]
    pub fn from_boxed(err: BoxError) -> Self {
        match err.downcast::<Error>() {
            Ok(err) => *err,
            Err(err) => Self::from_foreign(err.as_ref()),
        }
    }

    /// Borrowing variant of [`Error::from_boxed`].
    #[must_use]
    pub fn from_ref(err: &(dyn std::error::Error + 'static)) -> Self {
        match err.downcast_ref::<Error>() {
            Some(err) => err.clone(),
            None => Self::from_foreign(err),
        }
    }

    fn from_foreign(err: &(dyn std::error::Error + 'static)) -> Self {
        if err.is::<tokio::time::error::Elapsed>() {
            return Self::deadline_exceeded(reason::DEADLINE_EXCEEDED, err.to_string());
        }
        Self::internal(reason::UNKNOWN, err.to_string())
    }
}

/// Reports whether `err`, or any error in its source chain, is a structured
/// error with the given reason.
#[must_use]
pub fn is(err: &(dyn std::error::Error + 'static), reason: &str) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(structured) = err.downcast_ref::<Error>() {
            if structured.reason == reason {
                return true;
            }
        }
        current = err.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, thiserror::Error)]
    #[error("wrapped")]
    struct Wrapper(#[source] Error);

    #[test]
    fn constructors_fix_codes() {
        assert_eq!(Error::invalid_argument("BadRequest", "x").code(), Code::InvalidArgument);
        assert_eq!(Error::not_found("Missing", "x").code(), Code::NotFound);
        assert_eq!(Error::internal("Boom", "x").code(), Code::Internal);
        assert_eq!(Error::unauthenticated("NoToken", "x").code(), Code::Unauthenticated);
    }

    #[test]
    fn metadata_is_attached() {
        let err = Error::invalid_argument("BadRequest", "bad name")
            .with_metadata("field", "name")
            .with_metadata("field", "title");
        assert_eq!(err.metadata().len(), 1);
        assert_eq!(err.metadata()["field"], "title");
    }

    #[test]
    fn is_matches_reason() {
        let err = Error::invalid_argument("BadRequest", "invalid argument error");
        assert!(is(&err, "BadRequest"));
        assert!(!is(&err, "NotFound"));
    }

    #[test]
    fn is_walks_source_chain() {
        let err = Wrapper(Error::not_found("UserMissing", "no such user"));
        assert!(is(&err, "UserMissing"));
    }

    #[test]
    fn is_false_for_foreign_errors() {
        let err = std::io::Error::other("disk on fire");
        assert!(!is(&err, reason::UNKNOWN));
    }

    #[test]
    fn from_boxed_keeps_structured_errors() {
        let original = Error::not_found("UserMissing", "no such user").with_metadata("id", "7");
        let boxed: BoxError = Box::new(original.clone());
        assert_eq!(Error::from_boxed(boxed), original);
    }

    #[test]
    fn from_boxed_maps_foreign_errors_to_internal_unknown() {
        let boxed: BoxError = Box::new(std::io::Error::other("socket reset"));
        let err = Error::from_boxed(boxed);
        assert_eq!(err.code(), Code::Internal);
        assert_eq!(err.reason(), reason::UNKNOWN);
        assert_eq!(err.message(), "socket reset");
    }

    #[tokio::test]
    async fn from_boxed_maps_elapsed_to_deadline_exceeded() {
        let elapsed = tokio::time::timeout(
            std::time::Duration::from_millis(1),
            std::future::pending::<()>(),
        )
        .await
        .unwrap_err();
        let err = Error::from_boxed(Box::new(elapsed));
        assert_eq!(err.code(), Code::DeadlineExceeded);
        assert_eq!(err.reason(), reason::DEADLINE_EXCEEDED);
    }

    #[test]
    fn code_integer_conversion() {
        for code in Code::ALL {
            assert_eq!(Code::try_from(code.as_i32()), Ok(code));
        }
        assert_eq!(Code::try_from(0), Err(InvalidCode(0)));
        assert_eq!(Code::try_from(17), Err(InvalidCode(17)));
    }

    #[test]
    fn http_table_matches_common_classes() {
        assert_eq!(Code::InvalidArgument.http_status(), 400);
        assert_eq!(Code::NotFound.http_status(), 404);
        assert_eq!(Code::Internal.http_status(), 500);
        assert_eq!(Code::Unknown.http_status(), 500);
        assert_eq!(Code::DeadlineExceeded.http_status(), 504);
    }

    #[test]
    fn json_shape_uses_integer_code() {
        let err = Error::invalid_argument("BadRequest", "invalid argument error");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "code": 3,
                "reason": "BadRequest",
                "message": "invalid argument error",
            })
        );
    }

    proptest! {
        #[test]
        fn http_round_trip_stays_in_status_class(idx in 0usize..16) {
            let code = Code::ALL[idx];
            let status = code.http_status();
            let back = Code::from_http_status(status);
            prop_assert_eq!(back.http_status() / 100, status / 100);
        }
    }
}
