//! Resource indicator injection (RFC 8707)
//!
//! This chain link binds outbound authorization traffic to the canonical
//! resource identifier of the MCP endpoint. Two request shapes are
//! recognized:
//!
//! - **Authorization GETs**: `GET` requests whose query carries
//!   `response_type=code` with a non-empty `client_id`. The `resource`
//!   query parameter is added when absent. (The flow also sets it when it
//!   builds the browser URL; the skip-when-present rule keeps the
//!   parameter from appearing twice.)
//! - **Token POSTs**: `POST` requests whose URL path ends with `/token`,
//!   `/oauth/token`, or `/oauth2/token` (case-insensitive). The
//!   form-encoded body is decoded, `resource` is added when absent, and
//!   the body and `Content-Length` are rewritten.
//!
//! Everything else passes through untouched, as does all traffic when the
//! link is configured with no resource URI or the `skip_resource_param`
//! override.

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::error::Result;
use crate::mcp::auth::chain::RequestChain;

/// Path suffixes that identify a token endpoint POST.
const TOKEN_PATH_SUFFIXES: [&str; 3] = ["/token", "/oauth/token", "/oauth2/token"];

// ---------------------------------------------------------------------------
// ResourceLink
// ---------------------------------------------------------------------------

/// Chain link that injects the `resource` parameter into authorization
/// requests and token exchanges.
pub struct ResourceLink {
    resource: Option<Url>,
    next: Arc<dyn RequestChain>,
}

impl ResourceLink {
    /// Creates the link.
    ///
    /// # Arguments
    ///
    /// * `resource` - The canonical resource identifier, or `None` to pass
    ///   all traffic through (empty `resource_uri` or the
    ///   `skip_resource_param` override).
    /// * `next` - The next chain stage.
    pub fn new(resource: Option<Url>, next: Arc<dyn RequestChain>) -> Self {
        Self { resource, next }
    }
}

#[async_trait]
impl RequestChain for ResourceLink {
    async fn execute(&self, request: reqwest::Request) -> Result<reqwest::Response> {
        let resource = match &self.resource {
            Some(resource) => resource.as_str(),
            None => return self.next.execute(request).await,
        };

        let request = if is_authorization_get(&request) {
            inject_query_resource(request, resource)
        } else if is_token_post(&request) {
            inject_form_resource(request, resource)
        } else {
            request
        };

        self.next.execute(request).await
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// `GET` with `response_type=code` and a non-empty `client_id` in the
/// query.
fn is_authorization_get(request: &reqwest::Request) -> bool {
    if request.method() != reqwest::Method::GET {
        return false;
    }
    let mut has_code_response = false;
    let mut has_client_id = false;
    for (key, value) in request.url().query_pairs() {
        match key.as_ref() {
            "response_type" if value == "code" => has_code_response = true,
            "client_id" if !value.is_empty() => has_client_id = true,
            _ => {}
        }
    }
    has_code_response && has_client_id
}

/// `POST` whose lowercased path ends with a known token endpoint suffix.
fn is_token_post(request: &reqwest::Request) -> bool {
    if request.method() != reqwest::Method::POST {
        return false;
    }
    let path = request.url().path().to_ascii_lowercase();
    TOKEN_PATH_SUFFIXES
        .iter()
        .any(|suffix| path.ends_with(suffix))
}

// ---------------------------------------------------------------------------
// Injection
// ---------------------------------------------------------------------------

/// Adds `resource` to the query string unless already present.
fn inject_query_resource(mut request: reqwest::Request, resource: &str) -> reqwest::Request {
    let already_present = request
        .url()
        .query_pairs()
        .any(|(key, _)| key == "resource");
    if !already_present {
        request
            .url_mut()
            .query_pairs_mut()
            .append_pair("resource", resource);
    }
    request
}

/// Adds `resource` to a form-encoded body unless already present,
/// rewriting the body and its `Content-Length`.
///
/// A token POST whose body is streaming (not held in memory) cannot be
/// rewritten; the request is forwarded unchanged in that case. The flow
/// always builds token requests with buffered form bodies, so this only
/// affects foreign traffic that happens to match the path classification.
fn inject_form_resource(mut request: reqwest::Request, resource: &str) -> reqwest::Request {
    let body_bytes: Vec<u8> = match request.body().and_then(|b| b.as_bytes()) {
        Some(bytes) => bytes.to_vec(),
        None => return request,
    };

    let pairs: Vec<(String, String)> = url::form_urlencoded::parse(&body_bytes)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if pairs.iter().any(|(k, _)| k == "resource") {
        return request;
    }

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (k, v) in &pairs {
        serializer.append_pair(k, v);
    }
    serializer.append_pair("resource", resource);
    let encoded = serializer.finish();

    request.headers_mut().insert(
        reqwest::header::CONTENT_LENGTH,
        reqwest::header::HeaderValue::from(encoded.len() as u64),
    );
    *request.body_mut() = Some(reqwest::Body::from(encoded));
    request
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
