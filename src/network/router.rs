//! Path dispatch from HTTP requests to jar service operations

use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::body::Body;
use hyper::header::{HeaderValue, ACCESS_CONTROL_REQUEST_METHOD, ALLOW};
use hyper::http::request::Parts;
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::ErrorKind;
use crate::id::{JarId, RequestId};
use crate::model::{CapturedRequest, IncomingRequest, Jar};
use crate::service::JarService;
use crate::{JarError, Result};

use super::cors::CorsPolicy;
use super::http::{
    decoded_path, empty_response, error_response, header_map, json_response, query_map,
    read_body, text_response, ResponseBody,
};
use super::sse;

/// Body of `GET /`
pub const GREETING: &str = "Request Jar is running. Create a jar with POST /jars.\n";

/// A parsed request path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// `/`
    Root,
    /// `/jars`
    Jars,
    /// `/jars/{jar}`
    Jar(JarId),
    /// `/jars/{jar}/events`
    Events(JarId),
    /// `/jars/{jar}/requests/{request}`
    Request(JarId, RequestId),
    /// `/r/{jar}` and everything below it
    Capture(JarId),
    /// Anything else
    Unknown,
}

impl Route {
    /// Parse a URI path
    #[must_use]
    pub fn parse(path: &str) -> Self {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let segments: Vec<&str> = trimmed.split('/').collect();

        match segments.as_slice() {
            [""] => Self::Root,
            ["jars"] => Self::Jars,
            ["jars", jar] if !jar.is_empty() => Self::Jar(JarId::from(*jar)),
            ["jars", jar, "events"] if !jar.is_empty() => Self::Events(JarId::from(*jar)),
            ["jars", jar, "requests", request] if !jar.is_empty() && !request.is_empty() => {
                Self::Request(JarId::from(*jar), RequestId::from(*request))
            }
            ["r", jar, ..] if !jar.is_empty() => Self::Capture(JarId::from(*jar)),
            _ => Self::Unknown,
        }
    }

    /// Methods the route answers, `None` when any method is captured
    #[must_use]
    pub fn allowed_methods(&self) -> Option<&'static str> {
        match self {
            Self::Root | Self::Events(_) => Some("GET, OPTIONS"),
            Self::Jars => Some("GET, POST, OPTIONS"),
            Self::Jar(_) | Self::Request(..) => Some("GET, DELETE, OPTIONS"),
            Self::Capture(_) | Self::Unknown => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct CreateJarBody {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Serialize)]
struct CreatedJar<'a> {
    id: &'a JarId,
}

#[derive(Debug, Serialize)]
struct JarWithRequests<'a> {
    jar: &'a Jar,
    requests: Vec<&'a CapturedRequest>,
}

/// Routes requests to the jar service
#[derive(Clone)]
pub struct Router {
    service: Arc<JarService>,
    cors: CorsPolicy,
    keepalive: Duration,
}

impl Router {
    /// Create a router
    #[must_use]
    pub fn new(service: Arc<JarService>, cors: CorsPolicy, keepalive: Duration) -> Self {
        Self {
            service,
            cors,
            keepalive,
        }
    }

    /// Answer one request; never fails, errors become status codes
    pub async fn handle<B>(&self, request: Request<B>, peer: SocketAddr) -> Response<ResponseBody>
    where
        B: Body,
        B::Error: Display,
    {
        let (parts, body) = request.into_parts();
        let route = Route::parse(parts.uri.path());

        if is_preflight(&parts, &route) {
            return self.cors.preflight(&parts.headers);
        }

        let mut response = match self.dispatch(&parts, route, body, peer).await {
            Ok(response) => response,
            Err(e) => {
                if e.kind() == ErrorKind::Internal {
                    error!("{} {} failed: {}", parts.method, parts.uri.path(), e);
                } else {
                    debug!("{} {} rejected: {}", parts.method, parts.uri.path(), e);
                }
                error_response(&e)
            }
        };

        self.cors.apply(&parts.headers, response.headers_mut());
        response
    }

    async fn dispatch<B>(
        &self,
        parts: &Parts,
        route: Route,
        body: B,
        peer: SocketAddr,
    ) -> Result<Response<ResponseBody>>
    where
        B: Body,
        B::Error: Display,
    {
        let method = &parts.method;

        let response = match route {
            Route::Root if method == Method::GET => text_response(StatusCode::OK, GREETING),

            Route::Jars if method == Method::GET => {
                let jars = self.service.list_all_jar_metadata()?;
                json_response(StatusCode::OK, &jars)
            }
            Route::Jars if method == Method::POST => {
                let raw = read_body(body).await?;
                let create = if raw.is_empty() {
                    CreateJarBody::default()
                } else {
                    serde_json::from_slice::<CreateJarBody>(&raw)
                        .map_err(|e| JarError::BadRequest(format!("Invalid jar body: {e}")))?
                };
                let id = self.service.create_jar(&create.name)?;
                json_response(StatusCode::CREATED, &CreatedJar { id: &id })
            }

            Route::Jar(ref jar_id) if method == Method::GET => {
                let (jar, requests) = self.service.get_jar_with_requests(jar_id)?;
                json_response(
                    StatusCode::OK,
                    &JarWithRequests {
                        jar: &jar,
                        requests: requests.iter().map(|r| &**r).collect(),
                    },
                )
            }
            Route::Jar(ref jar_id) if method == Method::DELETE => {
                self.service.delete_jar(jar_id)?;
                empty_response(StatusCode::NO_CONTENT)
            }

            Route::Events(ref jar_id) if method == Method::GET => {
                let subscription = self.service.subscribe(jar_id)?;
                debug!("Subscriber {} opened stream on jar {}", subscription.id(), jar_id);
                sse::event_stream(subscription, self.keepalive)
            }

            Route::Request(ref jar_id, ref request_id) if method == Method::GET => {
                let request = self.service.get_request(jar_id, request_id)?;
                json_response(StatusCode::OK, &*request)
            }
            Route::Request(ref jar_id, ref request_id) if method == Method::DELETE => {
                self.service.delete_request(jar_id, request_id)?;
                empty_response(StatusCode::NO_CONTENT)
            }

            Route::Capture(ref jar_id) => {
                let incoming = IncomingRequest {
                    method: method.to_string(),
                    path: decoded_path(parts.uri.path()),
                    headers: header_map(&parts.headers),
                    query: query_map(parts.uri.query()),
                    client_ip: peer.to_string(),
                    body: read_body(body).await?,
                };
                self.service.capture_request(jar_id, incoming)?;
                empty_response(StatusCode::OK)
            }

            Route::Unknown => text_response(StatusCode::NOT_FOUND, "not found"),

            other => method_not_allowed(&other),
        };

        Ok(response)
    }
}

fn method_not_allowed(route: &Route) -> Response<ResponseBody> {
    let mut response = text_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
    if let Some(allowed) = route.allowed_methods() {
        response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static(allowed));
    }
    response
}

// OPTIONS sent to a capture URL is only a preflight when the browser marks
// it as one; otherwise it is captured like any other method.
fn is_preflight(parts: &Parts, route: &Route) -> bool {
    if parts.method != Method::OPTIONS {
        return false;
    }
    match route {
        Route::Capture(_) => parts.headers.contains_key(ACCESS_CONTROL_REQUEST_METHOD),
        _ => true,
    }
}
