//! The framework independent view of an inbound image request.

use std::collections::BTreeMap;

use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

/// Header carrying credentials meant for the image origin rather than for us.
pub const X_FORWARD_AUTHORIZATION: &str = "x-forward-authorization";

/// An inbound request for an image.
///
/// Sources only look at the method, the query parameters and a few headers, so this is all
/// that is kept from the HTTP request.
#[derive(Clone, Debug)]
pub struct ImageRequest {
    /// The HTTP method.
    pub method: Method,
    /// Decoded query parameters.
    pub params: BTreeMap<String, String>,
    /// All request headers.
    pub headers: HeaderMap,
}

impl ImageRequest {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            params: BTreeMap::new(),
            headers: HeaderMap::new(),
        }
    }

    /// Shorthand for a `GET` request.
    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Returns the query parameter `name`, unless it is missing or empty.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// Returns the header `name`, unless it is missing or empty.
    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers.get(name).filter(|value| !value.is_empty())
    }

    /// Whether the request only reads, that is, is a `GET` or `HEAD` request.
    pub fn is_read(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }
}
