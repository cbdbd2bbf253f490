//! HTTP response with its body fully read.

use crate::base::neterror::NetError;
use crate::http::codec::ResponseHead;
use bytes::Bytes;
use http::{HeaderMap, StatusCode, Version};
use url::Url;

/// The final response of a [`Client::send`](crate::client::Client::send),
/// after any redirects were followed.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
    url: Url,
    redirects: usize,
}

impl HttpResponse {
    pub(crate) fn new(head: ResponseHead, body: Bytes, url: Url) -> Self {
        Self {
            status: head.status,
            version: head.version,
            headers: head.headers,
            body,
            url,
            redirects: 0,
        }
    }

    pub(crate) fn with_redirects(mut self, redirects: usize) -> Self {
        self.redirects = redirects;
        self
    }

    /// Get the status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// URL of the request that produced this response.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Number of redirects followed to get here.
    pub fn redirect_count(&self) -> usize {
        self.redirects
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn bytes(self) -> Bytes {
        self.body
    }

    /// Body as UTF-8 text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|_| NetError::InvalidUtf8)
    }

    /// Body deserialized from JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, NetError> {
        serde_json::from_slice(&self.body).map_err(|e| {
            tracing::debug!(error = %e, "response body is not valid JSON");
            NetError::JsonParseError
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(body: &'static [u8]) -> HttpResponse {
        let head = ResponseHead {
            status: StatusCode::OK,
            version: Version::HTTP_11,
            reason: "OK".into(),
            headers: HeaderMap::new(),
        };
        HttpResponse::new(head, Bytes::from_static(body), Url::parse("http://a.test/").unwrap())
    }

    #[test]
    fn test_text() {
        assert_eq!(response(b"hello").text().unwrap(), "hello");
        assert_eq!(response(b"\xff\xfe").text().unwrap_err(), NetError::InvalidUtf8);
    }

    #[test]
    fn test_json() {
        let value: serde_json::Value = response(br#"{"a":1}"#).json().unwrap();
        assert_eq!(value["a"], 1);
        assert_eq!(
            response(b"not json").json::<serde_json::Value>().unwrap_err(),
            NetError::JsonParseError
        );
    }
}
