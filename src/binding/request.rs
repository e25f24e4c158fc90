//! Protocol request and response abstractions
//!
//! Decoders and rules consume transport data through these traits; the
//! embedding application adapts its HTTP stack to them. An owned
//! `HttpRequest` implementation is provided for bridging and tests.

use std::collections::BTreeMap;

/// An inbound protocol request, already received by the transport layer.
pub trait ProtocolRequest: Send + Sync {
    /// HTTP method, uppercase.
    fn method(&self) -> &str;

    /// Raw query string, exactly as received (URL-encoding intact).
    fn query_string(&self) -> &str;

    /// Decoded value of a query or form parameter.
    fn parameter(&self, name: &str) -> Option<&str>;

    /// All decoded values of a repeating parameter.
    fn parameters(&self, name: &str) -> Vec<&str>;

    /// Full request URL.
    fn request_url(&self) -> &str;

    fn content_type(&self) -> Option<&str>;

    fn body(&self) -> Option<&[u8]>;

    /// DER-encoded client certificates presented on the transport.
    fn client_certificates(&self) -> &[Vec<u8>];

    /// Request cookies by name.
    fn cookies(&self) -> &BTreeMap<String, String>;
}

/// Outbound response handle, used only for cookie maintenance.
pub trait ProtocolResponse: Send {
    /// Set (or, with None, delete) a cookie.
    fn set_cookie(&mut self, name: &str, value: Option<&str>);
}

/// Owned request value implementing `ProtocolRequest`.
#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    method: String,
    url: String,
    query: String,
    parameters: Vec<(String, String)>,
    content_type: Option<String>,
    body: Option<Vec<u8>>,
    client_certificates: Vec<Vec<u8>>,
    cookies: BTreeMap<String, String>,
}

impl HttpRequest {
    pub fn builder() -> HttpRequestBuilder {
        HttpRequestBuilder::default()
    }
}

impl ProtocolRequest for HttpRequest {
    fn method(&self) -> &str {
        &self.method
    }

    fn query_string(&self) -> &str {
        &self.query
    }

    fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn parameters(&self, name: &str) -> Vec<&str> {
        self.parameters
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    fn request_url(&self) -> &str {
        &self.url
    }

    fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    fn client_certificates(&self) -> &[Vec<u8>] {
        &self.client_certificates
    }

    fn cookies(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }
}

/// Builder for `HttpRequest`.
#[derive(Debug, Default)]
pub struct HttpRequestBuilder {
    request: HttpRequest,
}

impl HttpRequestBuilder {
    pub fn method(mut self, method: &str) -> Self {
        self.request.method = method.to_uppercase();
        self
    }

    pub fn url(mut self, url: &str) -> Self {
        self.request.url = url.to_string();
        if let Some((_, query)) = url.split_once('?') {
            if self.request.query.is_empty() {
                return self.query(&query.to_string());
            }
        }
        self
    }

    /// Set the raw query string and absorb its decoded parameters.
    pub fn query(mut self, query: &str) -> Self {
        self.request.query = query.to_string();
        for pair in query.split('&') {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = urlencoding::decode(key).map(|c| c.into_owned());
            let value = urlencoding::decode(value).map(|c| c.into_owned());
            if let (Ok(key), Ok(value)) = (key, value) {
                self.request.parameters.push((key, value));
            }
        }
        self
    }

    /// Add a decoded form parameter.
    pub fn form(mut self, name: &str, value: &str) -> Self {
        self.request
            .parameters
            .push((name.to_string(), value.to_string()));
        self
    }

    pub fn content_type(mut self, content_type: &str) -> Self {
        self.request.content_type = Some(content_type.to_string());
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.request.body = Some(body.into());
        self
    }

    pub fn client_certificate(mut self, der: Vec<u8>) -> Self {
        self.request.client_certificates.push(der);
        self
    }

    pub fn cookie(mut self, name: &str, value: &str) -> Self {
        self.request.cookies.insert(name.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> HttpRequest {
        self.request
    }
}

/// In-memory response handle recording cookie mutations.
#[derive(Debug, Default)]
pub struct HttpResponse {
    pub cookies: Vec<(String, Option<String>)>,
}

impl HttpResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deleted_cookies(&self) -> Vec<&str> {
        self.cookies
            .iter()
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| k.as_str())
            .collect()
    }
}

impl ProtocolResponse for HttpResponse {
    fn set_cookie(&mut self, name: &str, value: Option<&str>) {
        self.cookies
            .push((name.to_string(), value.map(str::to_string)));
    }
}
