//! Outgoing requests.

use crate::base::neterror::NetError;
use crate::socket::endpoint::Endpoint;
use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderValue};
use http::Method;
use url::Url;

/// Request body for HTTP methods that send data.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    /// No body (GET, HEAD, DELETE).
    #[default]
    Empty,
    /// Body with raw bytes.
    Bytes(Bytes),
}

impl From<String> for RequestBody {
    fn from(s: String) -> Self {
        RequestBody::Bytes(Bytes::from(s))
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(v: Vec<u8>) -> Self {
        RequestBody::Bytes(Bytes::from(v))
    }
}

impl From<&str> for RequestBody {
    fn from(s: &str) -> Self {
        RequestBody::Bytes(Bytes::from(s.to_owned()))
    }
}

impl From<Bytes> for RequestBody {
    fn from(b: Bytes) -> Self {
        RequestBody::Bytes(b)
    }
}

impl RequestBody {
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        match self {
            RequestBody::Empty => 0,
            RequestBody::Bytes(b) => b.len(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            RequestBody::Empty => &[],
            RequestBody::Bytes(b) => b,
        }
    }
}

/// One request as it goes out on the wire: one hop of a redirect chain.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn endpoint(&self) -> Result<Endpoint, NetError> {
        Endpoint::from_url(&self.url)
    }

    /// Origin-form request target: path plus query, never empty.
    pub fn target(&self) -> String {
        let path = self.url.path();
        let path = if path.is_empty() { "/" } else { path };
        match self.url.query() {
            Some(q) => format!("{path}?{q}"),
            None => path.to_string(),
        }
    }

    /// Headers to put on the wire: the caller's, plus `Host` when missing.
    pub fn wire_headers(&self) -> Result<HeaderMap, NetError> {
        let mut headers = self.headers.clone();
        if !headers.contains_key(header::HOST) {
            let authority = self.endpoint()?.authority();
            let value = HeaderValue::from_str(&authority).map_err(|_| NetError::InvalidUrl)?;
            headers.insert(header::HOST, value);
        }
        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_body() {
        let body = RequestBody::Empty;
        assert!(body.is_empty());
        assert_eq!(body.len(), 0);
        assert!(body.as_bytes().is_empty());
    }

    #[test]
    fn test_body_conversions() {
        let body: RequestBody = "hello world".to_string().into();
        assert_eq!(body.len(), 11);
        let body: RequestBody = vec![1u8, 2, 3, 4].into();
        assert_eq!(body.as_bytes(), &[1, 2, 3, 4]);
        let body: RequestBody = Bytes::from_static(b"raw").into();
        assert_eq!(body.len(), 3);
        let body: RequestBody = "".into();
        assert!(body.is_empty());
    }

    #[test]
    fn test_target_includes_query() {
        let req = HttpRequest::new(Method::GET, Url::parse("http://a.test/x/y?q=1&r=2").unwrap());
        assert_eq!(req.target(), "/x/y?q=1&r=2");

        let req = HttpRequest::new(Method::GET, Url::parse("http://a.test").unwrap());
        assert_eq!(req.target(), "/");
    }

    #[test]
    fn test_host_header_added() {
        let req = HttpRequest::new(Method::GET, Url::parse("http://a.test:8080/").unwrap());
        let headers = req.wire_headers().unwrap();
        assert_eq!(headers[header::HOST], "a.test:8080");

        let mut req = HttpRequest::new(Method::GET, Url::parse("https://a.test/").unwrap());
        assert_eq!(req.wire_headers().unwrap()[header::HOST], "a.test");
        req.headers.insert(header::HOST, HeaderValue::from_static("override"));
        assert_eq!(req.wire_headers().unwrap()[header::HOST], "override");
    }
}
