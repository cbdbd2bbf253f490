//! Redirect following.
//!
//! The exchange itself never follows a `3xx`: it completes and the client
//! decides here whether to issue the next hop.

use crate::base::neterror::NetError;
use crate::http::codec::ResponseHead;
use crate::http::request::{HttpRequest, RequestBody};
use crate::socket::endpoint::Endpoint;
use http::header::{self, HeaderName};
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

/// When to keep credentials across a redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RedirectAuthHeaders {
    /// Drop credentials on every redirect.
    Never,
    /// Keep them while scheme, host and port stay the same, or the only
    /// change is an upgrade from `http` to `https` on the same host.
    #[default]
    SameOrigin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedirectPolicy {
    /// Maximum redirects followed for one request (default: 10).
    pub max_redirects: usize,
    pub auth_headers: RedirectAuthHeaders,
}

impl Default for RedirectPolicy {
    fn default() -> Self {
        Self {
            max_redirects: 10,
            auth_headers: RedirectAuthHeaders::default(),
        }
    }
}

const CREDENTIAL_HEADERS: [HeaderName; 3] = [
    header::AUTHORIZATION,
    header::COOKIE,
    header::PROXY_AUTHORIZATION,
];

const BODY_HEADERS: [HeaderName; 4] = [
    header::CONTENT_LENGTH,
    header::CONTENT_TYPE,
    header::CONTENT_ENCODING,
    header::TRANSFER_ENCODING,
];

impl RedirectPolicy {
    /// A policy that returns every `3xx` to the caller untouched.
    pub fn none() -> Self {
        Self {
            max_redirects: 0,
            ..Default::default()
        }
    }

    pub fn limited(max_redirects: usize) -> Self {
        Self {
            max_redirects,
            ..Default::default()
        }
    }

    /// The request for the next hop, or `None` when `head` is not a
    /// followable redirect. `followed` counts the hops already taken.
    pub fn next_request(
        &self,
        request: &HttpRequest,
        head: &ResponseHead,
        followed: usize,
    ) -> Result<Option<HttpRequest>, NetError> {
        let Some(location) = redirect_location(&request.url, head)? else {
            return Ok(None);
        };
        if followed >= self.max_redirects {
            if self.max_redirects == 0 {
                return Ok(None);
            }
            tracing::debug!(followed, url = %request.url, "redirect limit reached");
            return Err(NetError::TooManyRedirects);
        }
        tracing::debug!(
            status = head.status.as_u16(),
            from = %request.url,
            to = %location,
            "following redirect"
        );
        self.rewrite(request, head.status, location).map(Some)
    }

    fn rewrite(
        &self,
        request: &HttpRequest,
        status: StatusCode,
        location: Url,
    ) -> Result<HttpRequest, NetError> {
        if !matches!(location.scheme(), "http" | "https") {
            return Err(NetError::InvalidRedirect);
        }

        let mut next = request.clone();
        next.headers.remove(header::HOST);

        let to_get = match status {
            StatusCode::SEE_OTHER => request.method != Method::HEAD,
            StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND => request.method == Method::POST,
            _ => false,
        };
        if to_get {
            next.method = Method::GET;
            next.body = RequestBody::Empty;
            for name in &BODY_HEADERS {
                next.headers.remove(name);
            }
        }

        if !self.keeps_credentials(&request.url, &location)? {
            for name in &CREDENTIAL_HEADERS {
                next.headers.remove(name);
            }
        }

        next.url = location;
        Ok(next)
    }

    fn keeps_credentials(&self, from: &Url, to: &Url) -> Result<bool, NetError> {
        match self.auth_headers {
            RedirectAuthHeaders::Never => Ok(false),
            RedirectAuthHeaders::SameOrigin => {
                let a = Endpoint::from_url(from)?;
                let b = Endpoint::from_url(to)?;
                if a == b {
                    return Ok(true);
                }
                let upgrade = !a.is_secure() && b.is_secure() && a.host() == b.host();
                Ok(upgrade)
            }
        }
    }
}

/// Statuses that carry a `Location` to follow. `304` and `300` do not.
pub fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

/// Resolve the `Location` of a redirect against the request URL.
pub fn redirect_location(base: &Url, head: &ResponseHead) -> Result<Option<Url>, NetError> {
    if !is_redirect(head.status) {
        return Ok(None);
    }
    let Some(location) = head.headers.get(header::LOCATION) else {
        return Ok(None);
    };
    let location = location.to_str().map_err(|_| NetError::InvalidRedirect)?;
    let mut url = base.join(location).map_err(|_| NetError::InvalidRedirect)?;
    // A fragment-less Location inherits the original fragment (RFC 9110 10.2.2).
    if url.fragment().is_none() {
        url.set_fragment(base.fragment());
    }
    Ok(Some(url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, HeaderValue, Version};

    fn head(status: u16, location: Option<&str>) -> ResponseHead {
        let mut headers = HeaderMap::new();
        if let Some(loc) = location {
            headers.insert(header::LOCATION, HeaderValue::from_str(loc).unwrap());
        }
        ResponseHead {
            status: StatusCode::from_u16(status).unwrap(),
            version: Version::HTTP_11,
            reason: String::new(),
            headers,
        }
    }

    fn post(url: &str) -> HttpRequest {
        let mut req = HttpRequest::new(Method::POST, Url::parse(url).unwrap());
        req.body = "data".into();
        req.headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        req.headers
            .insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        req
    }

    #[test]
    fn test_relative_location() {
        let base = Url::parse("http://a.test/x/y").unwrap();
        let url = redirect_location(&base, &head(302, Some("../z?q=1"))).unwrap().unwrap();
        assert_eq!(url.as_str(), "http://a.test/z?q=1");
        assert!(redirect_location(&base, &head(304, Some("/z"))).unwrap().is_none());
        assert!(redirect_location(&base, &head(302, None)).unwrap().is_none());
    }

    #[test]
    fn test_see_other_becomes_get() {
        let policy = RedirectPolicy::default();
        let next = policy
            .next_request(&post("http://a.test/form"), &head(303, Some("/done")), 0)
            .unwrap()
            .unwrap();
        assert_eq!(next.method, Method::GET);
        assert!(next.body.is_empty());
        assert!(!next.headers.contains_key(header::CONTENT_TYPE));
        assert!(next.headers.contains_key(header::AUTHORIZATION));
    }

    #[test]
    fn test_temporary_redirect_keeps_method() {
        let next = RedirectPolicy::default()
            .next_request(&post("http://a.test/"), &head(307, Some("/again")), 0)
            .unwrap()
            .unwrap();
        assert_eq!(next.method, Method::POST);
        assert_eq!(next.body.len(), 4);
    }

    #[test]
    fn test_cross_origin_strips_credentials() {
        let next = RedirectPolicy::default()
            .next_request(&post("http://a.test/"), &head(307, Some("http://b.test/")), 0)
            .unwrap()
            .unwrap();
        assert!(!next.headers.contains_key(header::AUTHORIZATION));

        let upgrade = RedirectPolicy::default()
            .next_request(&post("http://a.test/"), &head(308, Some("https://a.test/")), 0)
            .unwrap()
            .unwrap();
        assert!(upgrade.headers.contains_key(header::AUTHORIZATION));
    }

    #[test]
    fn test_limit() {
        let policy = RedirectPolicy::default();
        let req = HttpRequest::new(Method::GET, Url::parse("http://a.test/").unwrap());
        assert!(policy.next_request(&req, &head(302, Some("/n")), 9).unwrap().is_some());
        assert_eq!(
            policy.next_request(&req, &head(302, Some("/n")), 10).unwrap_err(),
            NetError::TooManyRedirects
        );
        assert!(RedirectPolicy::none()
            .next_request(&req, &head(302, Some("/n")), 0)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_non_http_location_rejected() {
        let req = HttpRequest::new(Method::GET, Url::parse("http://a.test/").unwrap());
        assert_eq!(
            RedirectPolicy::default()
                .next_request(&req, &head(302, Some("ftp://a.test/")), 0)
                .unwrap_err(),
            NetError::InvalidRedirect
        );
    }
}
