//! Blocking HTTP plumbing shared by the backend clients.

use reqwest::Method;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;

use crate::config::Secret;
use crate::error::{MigrateError, Result};

/// Longest error body kept in [`MigrateError::Http`].
const MAX_ERROR_BODY: usize = 2048;

pub const JSON: &str = "application/json";
pub const JSON_PATCH: &str = "application/json-patch+json";
pub const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Clone)]
pub enum Auth {
    Basic { user: String, secret: Secret },
    Bearer(Secret),
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic { user, .. } => write!(f, "Basic({user}, ********)"),
            Self::Bearer(_) => f.write_str("Bearer(********)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    auth: Auth,
}

impl HttpClient {
    pub fn new(auth: Auth, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("ticket-migrate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, auth })
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.auth {
            Auth::Basic { user, secret } => builder.basic_auth(user, Some(secret.expose())),
            Auth::Bearer(token) => builder.bearer_auth(token.expose()),
        }
    }

    fn send(
        &self,
        method: Method,
        url: &str,
        build: impl FnOnce(RequestBuilder) -> RequestBuilder,
    ) -> Result<Response> {
        tracing::debug!(%method, url, "HTTP request");
        let response = build(self.request(method.clone(), url)).send()?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let mut body = response.text().unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let cut = (0..=MAX_ERROR_BODY).rev().find(|&i| body.is_char_boundary(i)).unwrap_or(0);
            body.truncate(cut);
        }
        Err(MigrateError::Http {
            method: method.to_string(),
            url: url.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    pub fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.send(Method::GET, url, |b| b.header(ACCEPT, JSON))?;
        decode(response)
    }

    pub fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.send(Method::GET, url, |b| b)?;
        Ok(response.bytes()?.to_vec())
    }

    /// Send a JSON body and decode a JSON answer.
    pub fn send_json<B, T>(&self, method: Method, url: &str, content_type: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let payload = serde_json::to_vec(body)?;
        let response = self.send(method, url, |b| {
            b.header(CONTENT_TYPE, content_type)
                .header(ACCEPT, JSON)
                .body(payload)
        })?;
        decode(response)
    }

    /// Send a JSON body and ignore whatever comes back.
    pub fn send_json_unit<B>(&self, method: Method, url: &str, content_type: &str, body: &B) -> Result<()>
    where
        B: Serialize + ?Sized,
    {
        let payload = serde_json::to_vec(body)?;
        self.send(method, url, |b| b.header(CONTENT_TYPE, content_type).body(payload))?;
        Ok(())
    }

    pub fn post_bytes<T: DeserializeOwned>(&self, url: &str, bytes: &[u8]) -> Result<T> {
        let body = bytes.to_vec();
        let response = self.send(Method::POST, url, |b| {
            b.header(CONTENT_TYPE, OCTET_STREAM).header(ACCEPT, JSON).body(body)
        })?;
        decode(response)
    }

    pub fn delete(&self, url: &str) -> Result<()> {
        self.send(Method::DELETE, url, |b| b)?;
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let text = response.text()?;
    Ok(serde_json::from_str(&text)?)
}

/// Append percent-encoded query parameters to `base`.
pub fn with_query(base: &str, params: &[(&str, &str)]) -> Result<String> {
    let url = reqwest::Url::parse_with_params(base, params)
        .map_err(|e| MigrateError::Config(format!("invalid URL {base}: {e}")))?;
    Ok(url.into())
}

/// Join a configured base URL and a path without doubling slashes.
pub fn join(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
