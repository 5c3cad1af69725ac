//! Request/response encoding and the HTTP error mapping.
//!
//! JSON is the default. Errors travel as a JSON body
//! `{"code", "reason", "message", "metadata"}` with the HTTP status taken
//! from [`Code::http_status`]. The body is the authority on the way back in:
//! the status is only consulted when the body is not a structured error.
//!
//! [`HttpCodec`] swaps any of the three steps (request decoding, reply
//! encoding, error encoding) for a custom function.

use std::fmt;
use std::sync::Arc;

use axum::extract::Query;
use axum::http::header::{HeaderName, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use meridian_core::errors::reason;
use meridian_core::{Code, Error};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

const APPLICATION_JSON: &str = "application/json";

// ---------------------------------------------------------------------------
// HttpCodec
// ---------------------------------------------------------------------------

/// Turns an inbound request into the JSON value the typed request is read from.
pub type RequestDecoder =
    Arc<dyn Fn(&Method, &Uri, &HeaderMap, &[u8]) -> Result<Value, Error> + Send + Sync>;

/// Renders a serialized reply.
pub type ReplyEncoder = Arc<dyn Fn(Value) -> Response + Send + Sync>;

/// Renders an error, including draining rejections, unknown routes and panics.
pub type ErrorEncoder = Arc<dyn Fn(&Error) -> Response + Send + Sync>;

/// Encoders and decoders used by typed routes. Unset steps use JSON.
#[derive(Clone, Default)]
pub struct HttpCodec {
    request: Option<RequestDecoder>,
    reply: Option<ReplyEncoder>,
    error: Option<ErrorEncoder>,
}

impl HttpCodec {
    #[must_use]
    pub fn with_request_decoder<F>(mut self, decoder: F) -> Self
    where
        F: Fn(&Method, &Uri, &HeaderMap, &[u8]) -> Result<Value, Error> + Send + Sync + 'static,
    {
        self.request = Some(Arc::new(decoder));
        self
    }

    #[must_use]
    pub fn with_reply_encoder<F>(mut self, encoder: F) -> Self
    where
        F: Fn(Value) -> Response + Send + Sync + 'static,
    {
        self.reply = Some(Arc::new(encoder));
        self
    }

    #[must_use]
    pub fn with_error_encoder<F>(mut self, encoder: F) -> Self
    where
        F: Fn(&Error) -> Response + Send + Sync + 'static,
    {
        self.error = Some(Arc::new(encoder));
        self
    }

    /// Decodes a typed request.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` with reason `CodecError` when the request
    /// does not decode into `Req`, or whatever a custom decoder returns.
    pub fn decode<Req: DeserializeOwned>(
        &self,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<Req, Error> {
        match &self.request {
            None => decode_request(method, uri, body),
            Some(decoder) => serde_json::from_value(decoder(method, uri, headers, body)?)
                .map_err(|e| Error::invalid_argument(reason::CODEC, e.to_string())),
        }
    }

    /// Encodes a typed reply. A reply that fails to serialize becomes an
    /// `Internal` error with reason `CodecError`.
    #[must_use]
    pub fn encode<Res: Serialize>(&self, reply: &Res) -> Response {
        let encoded = match &self.reply {
            None => serde_json::to_vec(reply)
                .map(|body| (json_content_type(), body).into_response()),
            Some(encoder) => serde_json::to_value(reply).map(encoder.as_ref()),
        };
        encoded
            .unwrap_or_else(|e| self.encode_error(&Error::internal(reason::CODEC, e.to_string())))
    }

    #[must_use]
    pub fn encode_error(&self, err: &Error) -> Response {
        match &self.error {
            None => encode_error(err),
            Some(encoder) => encoder(err),
        }
    }
}

impl fmt::Debug for HttpCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = |custom: bool| if custom { "custom" } else { "json" };
        f.debug_struct("HttpCodec")
            .field("request", &step(self.request.is_some()))
            .field("reply", &step(self.reply.is_some()))
            .field("error", &step(self.error.is_some()))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

/// Renders a structured error as an HTTP response.
#[must_use]
pub fn encode_error(err: &Error) -> Response {
    let status =
        StatusCode::from_u16(err.code().http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match serde_json::to_vec(err) {
        Ok(body) => (status, json_content_type(), body).into_response(),
        Err(_) => status.into_response(),
    }
}

/// Recovers a structured error from an HTTP error response.
///
/// Falls back to the status table with reason `Unknown` when the body is not
/// a structured error.
#[must_use]
pub fn decode_error(status: StatusCode, body: &[u8]) -> Error {
    if let Ok(err) = serde_json::from_slice::<Error>(body) {
        return err;
    }
    Error::new(
        Code::from_http_status(status.as_u16()),
        reason::UNKNOWN,
        String::from_utf8_lossy(body).into_owned(),
    )
}

/// Decodes a typed request: the query string for `GET`, the JSON body
/// otherwise. An empty body decodes as `{}`.
pub(crate) fn decode_request<Req: DeserializeOwned>(
    method: &Method,
    uri: &Uri,
    body: &[u8],
) -> Result<Req, Error> {
    if *method == Method::GET {
        return Query::<Req>::try_from_uri(uri)
            .map(|Query(request)| request)
            .map_err(|rejection| Error::invalid_argument(reason::CODEC, rejection.body_text()));
    }
    let body = if body.is_empty() { b"{}".as_slice() } else { body };
    serde_json::from_slice(body).map_err(|e| Error::invalid_argument(reason::CODEC, e.to_string()))
}

fn json_content_type() -> [(HeaderName, HeaderValue); 1] {
    [(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON))]
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use proptest::prelude::*;
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Greeting {
        #[serde(default)]
        name: String,
    }

    async fn body_of(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn bad_request_maps_to_400_with_reason() {
        let err = Error::invalid_argument("BadRequest", "invalid argument error");
        let response = encode_error(&err);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[CONTENT_TYPE], APPLICATION_JSON);

        let body: serde_json::Value = serde_json::from_slice(&body_of(response).await).unwrap();
        assert_eq!(body["reason"], "BadRequest");
        assert_eq!(body["code"], 3);
    }

    #[tokio::test]
    async fn encode_then_decode_recovers_error() {
        let err = Error::not_found("UserMissing", "no such user").with_metadata("id", "7");
        let response = encode_error(&err);
        let status = response.status();
        let decoded = decode_error(status, &body_of(response).await);
        assert_eq!(decoded, err);
    }

    #[test]
    fn unstructured_body_falls_back_to_status() {
        let err = decode_error(StatusCode::BAD_GATEWAY, b"upstream down");
        assert_eq!(err.code(), Code::Internal);
        assert_eq!(err.reason(), reason::UNKNOWN);
        assert_eq!(err.message(), "upstream down");
    }

    #[test]
    fn get_decodes_query_string() {
        let uri: Uri = "/hello?name=world".parse().unwrap();
        let request: Greeting = decode_request(&Method::GET, &uri, b"").unwrap();
        assert_eq!(request.name, "world");
    }

    #[test]
    fn empty_post_body_decodes_as_empty_object() {
        let uri: Uri = "/hello".parse().unwrap();
        let request: Greeting = decode_request(&Method::POST, &uri, b"").unwrap();
        assert_eq!(request, Greeting { name: String::new() });
    }

    #[test]
    fn malformed_json_is_a_codec_error() {
        let uri: Uri = "/hello".parse().unwrap();
        let err = decode_request::<Greeting>(&Method::POST, &uri, b"{not json").unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
        assert_eq!(err.reason(), reason::CODEC);
    }

    #[tokio::test]
    async fn custom_steps_replace_json() {
        let codec = HttpCodec::default()
            .with_request_decoder(|_: &Method, _: &Uri, headers: &HeaderMap, _: &[u8]| {
                let name = headers
                    .get("x-name")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or_default();
                Ok(serde_json::json!({ "name": name }))
            })
            .with_reply_encoder(|value: Value| value["name"].to_string().into_response())
            .with_error_encoder(|err: &Error| {
                (StatusCode::IM_A_TEAPOT, err.reason().to_string()).into_response()
            });

        let mut headers = HeaderMap::new();
        headers.insert("x-name", HeaderValue::from_static("tea"));
        let uri: Uri = "/hello".parse().unwrap();
        let request: Greeting = codec.decode(&Method::POST, &uri, &headers, b"ignored").unwrap();
        assert_eq!(request.name, "tea");

        let response = codec.encode(&serde_json::json!({ "name": "pot" }));
        assert_eq!(body_of(response).await, b"\"pot\"");

        let response = codec.encode_error(&Error::internal("Steeped", "too long"));
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(body_of(response).await, b"Steeped");
        assert_eq!(
            format!("{codec:?}"),
            r#"HttpCodec { request: "custom", reply: "custom", error: "custom" }"#
        );
    }

    #[test]
    fn custom_decoder_output_must_fit_the_request() {
        let codec = HttpCodec::default()
            .with_request_decoder(|_: &Method, _: &Uri, _: &HeaderMap, _: &[u8]| {
                Ok(serde_json::json!({ "name": 7 }))
            });
        let uri: Uri = "/hello".parse().unwrap();
        let err = codec
            .decode::<Greeting>(&Method::POST, &uri, &HeaderMap::new(), b"")
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
        assert_eq!(err.reason(), reason::CODEC);
    }

    #[test]
    fn default_codec_is_json() {
        let codec = HttpCodec::default();
        let uri: Uri = "/hello".parse().unwrap();
        let request: Greeting = codec
            .decode(&Method::POST, &uri, &HeaderMap::new(), br#"{"name":"json"}"#)
            .unwrap();
        assert_eq!(request.name, "json");
        let response = codec.encode(&serde_json::json!({ "message": "hi" }));
        assert_eq!(response.headers()[CONTENT_TYPE], APPLICATION_JSON);
    }

    proptest! {
        #[test]
        fn body_round_trip_preserves_reason_and_metadata(
            idx in 0usize..16,
            reason in "[A-Za-z]{1,16}",
            message in ".{0,32}",
            metadata in proptest::collection::hash_map("[a-z]{1,8}", "[ -~]{0,16}", 0..4),
        ) {
            let code = Code::ALL[idx];
            let err = Error::new(code, reason.clone(), message)
                .with_metadata_map(metadata.clone());
            let status = StatusCode::from_u16(code.http_status()).unwrap();
            let body = serde_json::to_vec(&err).unwrap();

            let decoded = decode_error(status, &body);
            prop_assert_eq!(decoded.reason(), reason.as_str());
            prop_assert_eq!(decoded.metadata(), &metadata);
            prop_assert_eq!(decoded.code().http_status() / 100, code.http_status() / 100);
        }
    }

    #[test]
    fn empty_metadata_is_omitted_and_restored() {
        let err = Error::internal("Boom", "x");
        let body = serde_json::to_vec(&err).unwrap();
        let decoded = decode_error(StatusCode::INTERNAL_SERVER_ERROR, &body);
        assert_eq!(decoded.metadata(), &HashMap::new());
    }
}
