//! Cross-origin resource sharing

use hyper::header::{
    HeaderMap, HeaderValue, ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
    ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_REQUEST_HEADERS,
    ORIGIN, VARY,
};
use hyper::{Response, StatusCode};

use crate::config::CorsConfig;

use super::http::{empty_response, ResponseBody};

/// Methods advertised on preflight responses
pub const ALLOWED_METHODS: &str = "GET, POST, PUT, DELETE, PATCH, OPTIONS";

/// Origin allow-list applied to every response
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    allowed_origins: Vec<String>,
    allow_any: bool,
    allow_credentials: bool,
}

impl CorsPolicy {
    /// Build the policy from configuration
    #[must_use]
    pub fn new(config: &CorsConfig) -> Self {
        Self {
            allow_any: config.allowed_origins.iter().any(|o| o == "*"),
            allowed_origins: config.allowed_origins.clone(),
            allow_credentials: config.allow_credentials,
        }
    }

    /// Whether an origin may read responses
    #[must_use]
    pub fn allows(&self, origin: &str) -> bool {
        self.allow_any || self.allowed_origins.iter().any(|o| o == origin)
    }

    /// Add CORS headers to a response for the given request headers
    pub fn apply(&self, request_headers: &HeaderMap, response_headers: &mut HeaderMap) {
        let Some(origin) = request_headers.get(ORIGIN) else {
            return;
        };

        response_headers.append(VARY, HeaderValue::from_static("Origin"));

        let allowed = origin.to_str().map(|o| self.allows(o)).unwrap_or(false);
        if !allowed {
            return;
        }

        response_headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
        if self.allow_credentials {
            response_headers.insert(
                ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
    }

    /// Answer a preflight request
    #[must_use]
    pub fn preflight(&self, request_headers: &HeaderMap) -> Response<ResponseBody> {
        let mut response = empty_response(StatusCode::NO_CONTENT);
        let headers = response.headers_mut();

        self.apply(request_headers, headers);

        if headers.contains_key(ACCESS_CONTROL_ALLOW_ORIGIN) {
            headers.insert(
                ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static(ALLOWED_METHODS),
            );
            if let Some(requested) = request_headers.get(ACCESS_CONTROL_REQUEST_HEADERS) {
                headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
            }
        }

        response
    }
}
