use super::headers::X_HTTP_METHOD_OVERRIDE;
use axum::http::{HeaderMap, Method};
use std::{collections::BTreeSet, fmt};

/// The HTTP methods the tus protocol and its extensions use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Patch,
    Delete,
    Options,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
        }
    }

    pub fn for_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "HEAD" => Some(Self::Head),
            "POST" => Some(Self::Post),
            "PATCH" => Some(Self::Patch),
            "DELETE" => Some(Self::Delete),
            "OPTIONS" => Some(Self::Options),
            _ => None,
        }
    }

    /// Classify a request into one of the `supported` methods.
    ///
    /// `X-HTTP-Method-Override` wins over the request line so clients behind
    /// proxies that strip PATCH/DELETE keep working.
    pub fn classify(
        method: &Method,
        headers: &HeaderMap,
        supported: &BTreeSet<HttpMethod>,
    ) -> Option<Self> {
        let name = headers
            .get(X_HTTP_METHOD_OVERRIDE)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| method.as_str());

        Self::for_name(name).filter(|candidate| supported.contains(candidate))
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
