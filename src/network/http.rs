//! HTTP response building and request field extraction

use std::collections::BTreeMap;
use std::convert::Infallible;

use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderValue, CONTENT_TYPE, HOST};
use hyper::{Response, StatusCode};
use serde::Serialize;
use tracing::error;

use crate::error::ErrorKind;
use crate::{JarError, Result};

/// Body type of every response the server writes
pub type ResponseBody = UnsyncBoxBody<Bytes, Infallible>;

/// Create a body from bytes
pub fn full(bytes: impl Into<Bytes>) -> ResponseBody {
    Full::new(bytes.into()).boxed_unsync()
}

/// Create an empty body
pub fn empty() -> ResponseBody {
    Empty::<Bytes>::new().boxed_unsync()
}

/// Create a plain-text response
#[must_use]
pub fn text_response(status: StatusCode, body: &str) -> Response<ResponseBody> {
    let mut response = Response::new(full(body.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Create an empty response
#[must_use]
pub fn empty_response(status: StatusCode) -> Response<ResponseBody> {
    let mut response = Response::new(empty());
    *response.status_mut() = status;
    response
}

/// Create a JSON response; serialization failures become a 500
#[must_use]
pub fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<ResponseBody> {
    match serde_json::to_vec(value) {
        Ok(body) => {
            let mut response = Response::new(full(body));
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => {
            error!("Failed to encode response body: {}", e);
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode response")
        }
    }
}

/// Status code for an error
#[must_use]
pub fn status_for(error: &JarError) -> StatusCode {
    match error.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Create an error response
#[must_use]
pub fn error_response(error: &JarError) -> Response<ResponseBody> {
    text_response(status_for(error), &error.to_string())
}

/// Read a whole request body
///
/// # Errors
///
/// Returns error if the body stream fails
pub async fn read_body<B>(body: B) -> Result<Bytes>
where
    B: hyper::body::Body,
    B::Error: std::fmt::Display,
{
    let collected = body
        .collect()
        .await
        .map_err(|e| JarError::Internal(format!("Failed to read body: {e}")))?;

    Ok(collected.to_bytes())
}

/// Header name to first value, names in canonical form
///
/// `Host` is left out; it is part of the request target, not a header of
/// the captured request. Values that are not visible ASCII are decoded
/// lossily.
#[must_use]
pub fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();

    for name in headers.keys().filter(|name| *name != HOST) {
        if let Some(value) = headers.get(name) {
            map.entry(canonical_header_name(name.as_str()))
                .or_insert_with(|| String::from_utf8_lossy(value.as_bytes()).into_owned());
        }
    }

    map
}

/// Canonical MIME form of a header name (`x-forwarded-for` -> `X-Forwarded-For`)
#[must_use]
pub fn canonical_header_name(name: &str) -> String {
    let mut canonical = String::with_capacity(name.len());
    let mut upper = true;

    for c in name.chars() {
        if upper {
            canonical.push(c.to_ascii_uppercase());
        } else {
            canonical.push(c.to_ascii_lowercase());
        }
        upper = c == '-';
    }

    canonical
}

/// Percent-decoded request path, or the raw path if it does not decode to UTF-8
#[must_use]
pub fn decoded_path(raw: &str) -> String {
    match urlencoding::decode(raw) {
        Ok(path) => path.into_owned(),
        Err(_) => raw.to_string(),
    }
}

/// Query parameter to first value, percent-decoded
#[must_use]
pub fn query_map(query: Option<&str>) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    let Some(query) = query else {
        return map;
    };

    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        map.entry(decode_component(key))
            .or_insert_with(|| decode_component(value));
    }

    map
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}
