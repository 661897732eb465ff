//! Outbound request description.
//!
//! An [`ApiRequest`] is plain data so the dispatcher can issue it twice
//! (original attempt and the single retry) without consuming it.

use bytes::Bytes;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use url::Url;

use super::DispatchError;

#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    Bytes {
        content_type: String,
        data: Bytes,
    },
}

/// A request against the backend, addressed by path relative to the API base.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: RequestBody,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Serialize `body` as the JSON payload.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, DispatchError> {
        let value = serde_json::to_value(body)
            .map_err(|e| DispatchError::InvalidRequest(format!("body is not JSON: {e}")))?;
        self.body = RequestBody::Json(value);
        Ok(self)
    }

    #[must_use]
    pub fn bytes(mut self, content_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.body = RequestBody::Bytes {
            content_type: content_type.into(),
            data: data.into(),
        };
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    /// Resolve against `base`. The result must stay on the base origin so the
    /// bearer token is never sent elsewhere.
    pub(crate) fn resolve(&self, base: &Url) -> Result<Url, DispatchError> {
        if !self.path.starts_with('/') || self.path.starts_with("//") {
            return Err(DispatchError::InvalidRequest(format!(
                "path must be absolute and host-relative: {}",
                self.path
            )));
        }
        let mut url = base
            .join(&self.path)
            .map_err(|e| DispatchError::InvalidRequest(format!("{}: {e}", self.path)))?;
        if url.origin() != base.origin() {
            return Err(DispatchError::InvalidRequest(format!(
                "path leaves the API origin: {}",
                self.path
            )));
        }
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.query);
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> Url {
        Url::parse("https://dash.example.com").unwrap()
    }

    #[test]
    fn test_resolve_path_and_query() {
        let url = ApiRequest::get("/api/documents")
            .query("page", "2")
            .query("q", "a b")
            .resolve(&base())
            .unwrap();
        assert_eq!(url.as_str(), "https://dash.example.com/api/documents?page=2&q=a+b");
    }

    #[test]
    fn test_resolve_keeps_inline_query() {
        let url = ApiRequest::get("/api/documents?sort=name")
            .query("page", "1")
            .resolve(&base())
            .unwrap();
        assert_eq!(url.query(), Some("sort=name&page=1"));
    }

    #[test]
    fn test_resolve_rejects_foreign_origin() {
        for path in ["//evil.example.com/x", "https://evil.example.com/x", "api/x"] {
            assert!(
                matches!(ApiRequest::get(path).resolve(&base()), Err(DispatchError::InvalidRequest(_))),
                "{path} should be rejected"
            );
        }
    }

    #[test]
    fn test_json_body() {
        let req = ApiRequest::post("/api/chat").json(&json!({"message": "hi"})).unwrap();
        assert_eq!(req.method(), &Method::POST);
        match req.body() {
            RequestBody::Json(v) => assert_eq!(v["message"], "hi"),
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn test_bytes_body_and_header() {
        let req = ApiRequest::put("/api/files/1")
            .bytes("text/plain", "hello")
            .header(HeaderName::from_static("x-trace"), HeaderValue::from_static("1"));
        assert_eq!(req.headers()["x-trace"], "1");
        assert!(matches!(req.body(), RequestBody::Bytes { data, .. } if data.as_ref() == b"hello"));
    }
}
