//! The outbound side of a tus exchange, built up by handlers one header at a time.

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::Response,
};
use tracing::debug;

#[derive(Debug, Default)]
pub struct TusResponse {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Option<Body>,
}

impl TusResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Set (replace) a header. Values that are not valid header text are dropped.
    pub fn set_header(&mut self, name: HeaderName, value: impl AsRef<str>) {
        match HeaderValue::from_str(value.as_ref()) {
            Ok(header_value) => {
                self.headers.insert(name, header_value);
            }
            Err(err) => debug!("dropping invalid value for header {}: {}", name, err),
        }
    }

    pub fn remove_header(&mut self, name: &HeaderName) {
        self.headers.remove(name);
    }

    /// Add `token` to a comma-separated list header unless it is already there.
    pub fn append_to_list_header(&mut self, name: HeaderName, token: &str) {
        let mut tokens: Vec<String> = self
            .header(&name)
            .map(|current| {
                current
                    .split(',')
                    .map(str::trim)
                    .filter(|existing| !existing.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        if tokens.iter().any(|existing| existing == token) {
            return;
        }
        tokens.push(token.to_string());
        self.set_header(name, tokens.join(","));
    }

    pub fn set_body(&mut self, body: Body) {
        self.body = Some(body);
    }

    /// Finish the exchange. Handlers that never chose a status get 200.
    pub fn into_response(self) -> Response {
        let mut response = Response::new(self.body.unwrap_or_else(Body::empty));
        *response.status_mut() = self.status.unwrap_or(StatusCode::OK);
        *response.headers_mut() = self.headers;
        response
    }
}
