//! Request/response calls against the REST API.
//!
//! The client attaches the stored credential as a bearer token, picks the
//! body encoding, and turns every failure into a [`RequestError`] with a
//! message fit for display. It never retries.

use crate::storage::CredentialStore;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::multipart::Form;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Shown when the server cannot be reached at all.
pub const UNREACHABLE_MESSAGE: &str =
    "Unable to connect to the server. It may be down or unreachable.";

/// Request body.
#[derive(Debug, Default)]
pub enum Body {
    #[default]
    Empty,
    Json(Value),
    /// File uploads. The HTTP layer writes the content type and boundary.
    Multipart(Form),
}

/// Method and body for one call.
#[derive(Debug)]
pub struct RequestOptions {
    pub method: Method,
    pub body: Body,
}

impl RequestOptions {
    pub fn get() -> Self {
        Self {
            method: Method::GET,
            body: Body::Empty,
        }
    }

    pub fn delete() -> Self {
        Self {
            method: Method::DELETE,
            body: Body::Empty,
        }
    }

    pub fn post(body: impl serde::Serialize) -> Result<Self, RequestError> {
        Self::json(Method::POST, body)
    }

    pub fn put(body: impl serde::Serialize) -> Result<Self, RequestError> {
        Self::json(Method::PUT, body)
    }

    pub fn json(method: Method, body: impl serde::Serialize) -> Result<Self, RequestError> {
        let value = serde_json::to_value(body)
            .map_err(|e| RequestError::InvalidRequest(format!("unserializable body: {e}")))?;
        Ok(Self {
            method,
            body: Body::Json(value),
        })
    }

    pub fn multipart(method: Method, form: Form) -> Self {
        Self {
            method,
            body: Body::Multipart(form),
        }
    }
}

/// REST client bound to one API base URL and credential store.
#[derive(Clone)]
pub struct RequestClient {
    base_url: String,
    http: reqwest::Client,
    store: Arc<dyn CredentialStore>,
}

impl std::fmt::Debug for RequestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl RequestClient {
    pub fn new(
        base_url: impl Into<String>,
        store: Arc<dyn CredentialStore>,
        timeout: Duration,
    ) -> Result<Self, RequestError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RequestError::InvalidRequest(e.to_string()))?;
        Ok(Self::with_http(base_url, store, http))
    }

    pub fn with_http(
        base_url: impl Into<String>,
        store: Arc<dyn CredentialStore>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            store,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build the request without sending it.
    pub fn prepare(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<reqwest::Request, RequestError> {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.http.request(options.method, &url);
        if let Some(credential) = self.store.load() {
            builder = builder.bearer_auth(credential.as_str());
        }
        builder = match options.body {
            Body::Empty => builder,
            Body::Json(value) => builder.json(&value),
            Body::Multipart(form) => builder.multipart(form),
        };
        builder
            .build()
            .map_err(|e| RequestError::InvalidRequest(format!("{url}: {e}")))
    }

    /// Send a request. `Ok(None)` means the response carried no JSON body.
    pub async fn request(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<Option<Value>, RequestError> {
        let method = options.method.clone();
        let request = self.prepare(path, options)?;

        let response = match self.http.execute(request).await {
            Ok(response) => response,
            Err(source) => {
                tracing::warn!("{} {} failed before a response: {}", method, path, source);
                return Err(RequestError::Network {
                    message: UNREACHABLE_MESSAGE.to_string(),
                    source,
                });
            }
        };

        let status = response.status();
        let json = is_json(response.headers());
        let bytes = response.bytes().await.map_err(|source| RequestError::Network {
            message: UNREACHABLE_MESSAGE.to_string(),
            source,
        })?;
        tracing::debug!("{} {} -> {} ({} bytes)", method, path, status, bytes.len());

        let body = classify(status, json, &bytes);
        if let Err(ref e) = body {
            tracing::debug!("{} {} rejected: {}", method, path, e);
        }
        body
    }

    /// Send a request and decode the body into `T`, unwrapping a `data`
    /// envelope when present.
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, RequestError> {
        match self.request(path, options).await? {
            Some(value) => decode(value),
            None => Err(RequestError::Decode(format!("{path}: expected a JSON body"))),
        }
    }

    /// Send a request and ignore whatever comes back.
    pub async fn send(&self, path: &str, options: RequestOptions) -> Result<(), RequestError> {
        self.request(path, options).await.map(|_| ())
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| {
            let mime = ct.split(';').next().unwrap_or("").trim();
            mime.eq_ignore_ascii_case("application/json") || mime.ends_with("+json")
        })
}

/// Turn a finished response into a body or an error.
pub fn classify(status: StatusCode, json: bool, body: &[u8]) -> Result<Option<Value>, RequestError> {
    if !status.is_success() {
        let message = serde_json::from_slice::<Value>(body)
            .ok()
            .and_then(|v| v.get("message")?.as_str().map(str::to_string))
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| status_message(status.as_u16()));
        return Err(RequestError::Http {
            status: status.as_u16(),
            message,
        });
    }

    if !json || body.is_empty() {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| RequestError::Decode(format!("response is not valid JSON: {e}")))
}

/// Fixed message for a status code without a usable error body.
pub fn status_message(status: u16) -> String {
    match status {
        400 => "Bad request. Please check your input.".to_string(),
        401 => "Unauthorized. Please log in again.".to_string(),
        403 => "Forbidden. You do not have permission to perform this action.".to_string(),
        404 => "The requested resource was not found.".to_string(),
        500 => "Internal server error. Please try again later.".to_string(),
        502 | 503 | 504 => "The server is currently unavailable. Please try again later.".to_string(),
        other => format!("HTTP error! status: {other}"),
    }
}

/// Envelope keys a server may put next to `data`.
const ENVELOPE_KEYS: [&str; 4] = ["data", "message", "success", "status"];

/// Decode `value` as `T`, unwrapping `{"data": ...}` envelopes.
///
/// An object counts as an envelope only when every key is one of
/// [`ENVELOPE_KEYS`], so payloads that merely have a `data` field are left
/// alone.
pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T, RequestError> {
    let inner = match value {
        Value::Object(mut map)
            if map.contains_key("data") && map.keys().all(|k| ENVELOPE_KEYS.contains(&k.as_str())) =>
        {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    };
    serde_json::from_value(inner).map_err(|e| RequestError::Decode(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// The server answered with a non-success status.
    #[error("{message}")]
    Http { status: u16, message: String },
    /// No response at all: refused, DNS, TLS, timeout.
    #[error("{message}")]
    Network {
        message: String,
        #[source]
        source: reqwest::Error,
    },
    /// The body did not have the expected shape.
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl RequestError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use reqwest::header::AUTHORIZATION;
    use serde::Deserialize;

    fn client(store: MemoryStore) -> RequestClient {
        RequestClient::new("http://api.test/", Arc::new(store), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn anonymous_request_has_no_authorization() {
        let req = client(MemoryStore::new())
            .prepare("/api/listings", RequestOptions::get())
            .unwrap();
        assert_eq!(req.url().as_str(), "http://api.test/api/listings");
        assert!(req.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn stored_credential_becomes_bearer_header() {
        let store = MemoryStore::with_credential("tok-123".parse().unwrap());
        let req = client(store).prepare("/api/auth/me", RequestOptions::get()).unwrap();
        let values: Vec<_> = req.headers().get_all(AUTHORIZATION).iter().collect();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0], "Bearer tok-123");
    }

    #[test]
    fn json_body_sets_json_content_type() {
        let options = RequestOptions::post(serde_json::json!({"a": 1})).unwrap();
        let req = client(MemoryStore::new()).prepare("/x", options).unwrap();
        assert_eq!(req.headers()[CONTENT_TYPE], "application/json");
        let body = req.body().and_then(|b| b.as_bytes()).unwrap();
        assert_eq!(body, br#"{"a":1}"#);
    }

    #[test]
    fn multipart_body_keeps_generated_boundary() {
        let form = Form::new().text("caption", "room photo");
        let options = RequestOptions::multipart(Method::POST, form);
        let req = client(MemoryStore::new()).prepare("/upload", options).unwrap();
        let ct = req.headers()[CONTENT_TYPE].to_str().unwrap();
        assert!(ct.starts_with("multipart/form-data; boundary="), "{ct}");
    }

    #[test]
    fn status_mapping_without_body() {
        let cases = [
            (400, "Bad request. Please check your input."),
            (401, "Unauthorized. Please log in again."),
            (403, "Forbidden. You do not have permission to perform this action."),
            (404, "The requested resource was not found."),
            (500, "Internal server error. Please try again later."),
            (502, "The server is currently unavailable. Please try again later."),
            (503, "The server is currently unavailable. Please try again later."),
            (504, "The server is currently unavailable. Please try again later."),
        ];
        for (code, expected) in cases {
            let status = StatusCode::from_u16(code).unwrap();
            for body in [&b""[..], b"<html>oops</html>", b"{\"error\":true}"] {
                let err = classify(status, false, body).unwrap_err();
                assert_eq!(err.to_string(), expected, "status {code}");
                assert_eq!(err.status(), Some(code));
            }
        }
    }

    #[test]
    fn unmapped_status_is_generic() {
        let err = classify(StatusCode::IM_A_TEAPOT, false, b"").unwrap_err();
        assert_eq!(err.to_string(), "HTTP error! status: 418");
    }

    #[test]
    fn server_message_wins() {
        let err = classify(StatusCode::CONFLICT, true, br#"{"message":"Already requested"}"#)
            .unwrap_err();
        assert_eq!(err.to_string(), "Already requested");

        let err = classify(StatusCode::UNAUTHORIZED, true, br#"{"message":"Token expired"}"#)
            .unwrap_err();
        assert_eq!(err.to_string(), "Token expired");
        assert!(err.is_unauthorized());
    }

    #[test]
    fn success_without_json_is_absent() {
        assert!(classify(StatusCode::NO_CONTENT, false, b"").unwrap().is_none());
        assert!(classify(StatusCode::OK, false, b"plain text").unwrap().is_none());
        assert!(classify(StatusCode::OK, true, b"").unwrap().is_none());
    }

    #[test]
    fn success_with_bad_json_is_decode_error() {
        let err = classify(StatusCode::OK, true, b"{").unwrap_err();
        assert!(matches!(err, RequestError::Decode(_)));
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Upload {
        data: String,
        filename: String,
    }

    #[test]
    fn decode_unwraps_envelope_only() {
        let v: Vec<u32> = decode(serde_json::json!({"success": true, "data": [1, 2]})).unwrap();
        assert_eq!(v, [1, 2]);

        let v: Vec<u32> = decode(serde_json::json!([3])).unwrap();
        assert_eq!(v, [3]);

        let upload: Upload =
            decode(serde_json::json!({"data": "base64", "filename": "a.png"})).unwrap();
        assert_eq!(upload.filename, "a.png");
        assert_eq!(upload.data, "base64");
    }

    #[test]
    fn decode_reports_shape_mismatch() {
        let err = decode::<Vec<u32>>(serde_json::json!({"data": "nope"})).unwrap_err();
        assert!(matches!(err, RequestError::Decode(_)));
    }
}
