//! Mapping between structured errors and gRPC statuses.
//!
//! The numeric code is carried as-is (both enumerations share the canonical
//! numbering). `reason` and `metadata` travel in the status details as an
//! `ErrorInfo` message with the field numbers of `google.rpc.ErrorInfo`.

use std::collections::HashMap;
use std::time::Duration;

use axum::http::HeaderMap;
use meridian_core::errors::reason;
use meridian_core::{Code, Error};
use prost::Message;
use tonic::Status;

/// Domain stamped on every `ErrorInfo` this crate produces.
pub const ERROR_DOMAIN: &str = "meridian";

/// Header carrying the caller's remaining deadline.
pub const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Error details carried in `grpc-status-details-bin`.
#[derive(Clone, PartialEq, Message)]
pub struct ErrorInfo {
    #[prost(string, tag = "1")]
    pub reason: String,
    #[prost(string, tag = "2")]
    pub domain: String,
    #[prost(map = "string, string", tag = "3")]
    pub metadata: HashMap<String, String>,
}

/// Converts a structured error into a gRPC status.
#[must_use]
pub fn to_status(err: &Error) -> Status {
    let info = ErrorInfo {
        reason: err.reason().to_string(),
        domain: ERROR_DOMAIN.to_string(),
        metadata: err.metadata().clone(),
    };
    Status::with_details(
        tonic::Code::from(err.code().as_i32()),
        err.message(),
        info.encode_to_vec().into(),
    )
}

/// Recovers a structured error from a gRPC status.
///
/// A status without `ErrorInfo` details gets a reason derived from its code.
#[must_use]
pub fn from_status(status: &Status) -> Error {
    let code = Code::try_from(status.code() as i32).unwrap_or(Code::Unknown);
    let info = Some(status.details())
        .filter(|details| !details.is_empty())
        .and_then(|details| ErrorInfo::decode(details).ok())
        .filter(|info| !info.reason.is_empty());
    match info {
        Some(info) => Error::new(code, info.reason, status.message()).with_metadata_map(info.metadata),
        None => Error::new(code, reason::for_code(code), status.message()),
    }
}

/// Parses the `grpc-timeout` header (`<digits><unit>`, unit one of
/// `H M S m u n`). Malformed values are ignored.
#[must_use]
pub fn parse_grpc_timeout(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(GRPC_TIMEOUT_HEADER)?.to_str().ok()?;
    if value.len() < 2 || value.len() > 9 {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    let amount: u64 = digits.parse().ok()?;
    let timeout = match unit {
        "H" => Duration::from_secs(amount.checked_mul(3600)?),
        "M" => Duration::from_secs(amount.checked_mul(60)?),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };
    Some(timeout)
}
