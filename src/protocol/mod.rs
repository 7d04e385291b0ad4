//! The request pipeline's building blocks.
//!
//! An [`Extension`] is a named bundle of [`RequestValidator`]s and
//! [`RequestHandler`]s. The dispatcher runs every supporting validator of
//! every enabled extension first, then every supporting handler, both in
//! extension priority order and, within an extension, in registration order.

pub mod headers;
pub mod method;
pub mod request;
pub mod response;

use crate::{errors::TusResult, services::upload_storage::UploadStorage};
use async_trait::async_trait;
use method::HttpMethod;
use request::TusRequest;
use response::TusResponse;

/// A check that may reject a request before any handler runs.
///
/// Validators may read through `storage` but never mutate it.
#[async_trait]
pub trait RequestValidator: Send + Sync {
    /// `method` is `None` when the request method was not recognized.
    fn supports(&self, method: Option<HttpMethod>) -> bool;

    async fn validate(
        &self,
        method: Option<HttpMethod>,
        request: &TusRequest,
        storage: &dyn UploadStorage,
        owner_key: Option<&str>,
    ) -> TusResult<()>;
}

/// A step that acts on a validated request and writes into the response.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    fn supports(&self, method: HttpMethod) -> bool;

    async fn process(
        &self,
        method: HttpMethod,
        request: &mut TusRequest,
        response: &mut TusResponse,
        storage: &dyn UploadStorage,
        owner_key: Option<&str>,
    ) -> TusResult<()>;
}

/// A protocol capability: the methods it needs plus its validators and handlers.
pub struct Extension {
    name: &'static str,
    methods: &'static [HttpMethod],
    validators: Vec<Box<dyn RequestValidator>>,
    handlers: Vec<Box<dyn RequestHandler>>,
    tracks_checksums: bool,
}

impl Extension {
    pub fn new(name: &'static str, methods: &'static [HttpMethod]) -> Self {
        Self {
            name,
            methods,
            validators: Vec::new(),
            handlers: Vec::new(),
            tracks_checksums: false,
        }
    }

    pub fn with_validator(mut self, validator: impl RequestValidator + 'static) -> Self {
        self.validators.push(Box::new(validator));
        self
    }

    pub fn with_handler(mut self, handler: impl RequestHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Ask the dispatcher to digest PATCH bodies while they stream.
    pub fn tracking_checksums(mut self) -> Self {
        self.tracks_checksums = true;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Methods the server must accept for this extension to work.
    pub fn methods(&self) -> &'static [HttpMethod] {
        self.methods
    }

    pub fn validators(&self) -> &[Box<dyn RequestValidator>] {
        &self.validators
    }

    pub fn handlers(&self) -> &[Box<dyn RequestHandler>] {
        &self.handlers
    }

    pub fn tracks_checksums(&self) -> bool {
        self.tracks_checksums
    }
}
