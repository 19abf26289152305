// HTTP transport - JSON over HTTPS for the REST-based adapters

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::error::{CollectorError, Result};
use crate::model::Credentials;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

/// A single call against an array's management API
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,

    /// Path and query, relative to the transport's base URL
    pub path: String,

    pub headers: Vec<(String, String)>,
    pub basic_auth: Option<Credentials>,
    pub body: Option<Value>,
}

impl ApiRequest {
    fn new(method: Method, path: &str) -> Self {
        ApiRequest {
            method,
            path: path.to_string(),
            headers: Vec::new(),
            basic_auth: None,
            body: None,
        }
    }

    pub fn get(path: &str) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: &str, body: Value) -> Self {
        let mut request = Self::new(Method::Post, path);
        request.body = Some(body);
        request
    }

    pub fn delete(path: &str) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn basic_auth(mut self, credentials: &Credentials) -> Self {
        self.basic_auth = Some(credentials.clone());
        self
    }
}

/// Response with lower-cased header names and a parsed JSON body
/// (`Value::Null` for an empty body)
#[derive(Debug, Clone, Default)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Value,
}

impl ApiResponse {
    pub fn json(body: Value) -> Self {
        ApiResponse {
            status: 200,
            headers: HashMap::new(),
            body,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Executes API requests against one array
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends the request. Non-2xx answers are returned as `CollectorError::Http`.
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse>;
}

/// reqwest-backed transport
///
/// One instance per adapter invocation, so the cookie jar (and with it any
/// session cookie) is never shared between servers or runs.
///
/// Certificate validation is disabled: appliances ship self-signed
/// certificates and are only reachable on private management networks.
pub struct ReqwestTransport {
    client: Client,
    base_url: String,
}

impl ReqwestTransport {
    /// Creates a transport for `https://{address}[:{port}]`
    pub fn new(address: &str, port: Option<u16>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .use_rustls_tls()
            .danger_accept_invalid_certs(true)
            .cookie_store(true)
            .no_proxy()
            .timeout(timeout)
            .build()?;

        let base_url = match port {
            Some(port) => format!("https://{}:{}", address, port),
            None => format!("https://{}", address),
        };

        Ok(ReqwestTransport { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        let url = format!("{}{}", self.base_url, request.path);
        debug!("{:?} {}", request.method, url);

        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Delete => self.client.delete(&url),
        };

        builder = builder.header(ACCEPT, "application/json");
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(credentials) = &request.basic_auth {
            builder = builder.basic_auth(&credentials.username, Some(&credentials.password));
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                CollectorError::Transport(format!("request to {} timed out", request.path))
            } else {
                CollectorError::Network(e)
            }
        })?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect::<HashMap<_, _>>();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(CollectorError::Http {
                path: request.path,
                status: status.as_u16(),
                body: text,
            });
        }

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text)?
        };

        Ok(ApiResponse {
            status: status.as_u16(),
            headers,
            body,
        })
    }
}
