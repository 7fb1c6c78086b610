use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::{
    header::{self, HeaderMap},
    Client,
};
use thiserror::Error;
use url::Url;

use crate::{
    auth::{endpoint_url, Credentials, DEFAULT_ADMIN_COOKIE},
    evaluator::{Observation, Strictness},
    suite::{AuthClass, EndpointDescriptor, Placeholders, SuiteError},
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Builds the single client every request of a run goes through.
pub fn build_client(timeout: Duration, insecure: bool) -> Result<Client> {
    if insecure {
        tracing::warn!("TLS certificate verification is disabled");
    }
    Client::builder()
        .timeout(timeout)
        .danger_accept_invalid_certs(insecure)
        .user_agent(concat!("smokepit/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("building HTTP client")
}

/// Everything a descriptor needs to run, passed explicitly to each test.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub client: Client,
    pub base_url: Url,
    pub credentials: Credentials,
    pub placeholders: Placeholders,
    pub strictness: Strictness,
    pub admin_cookie: String,
}

impl ExecutionContext {
    pub fn new(client: Client, base_url: Url, credentials: Credentials) -> Self {
        Self {
            client,
            base_url,
            credentials,
            placeholders: Placeholders::new(),
            strictness: Strictness::default(),
            admin_cookie: DEFAULT_ADMIN_COOKIE.to_string(),
        }
    }

    pub fn with_placeholders(mut self, placeholders: Placeholders) -> Self {
        self.placeholders = placeholders;
        self
    }

    pub fn with_strictness(mut self, strictness: Strictness) -> Self {
        self.strictness = strictness;
        self
    }

    pub fn with_admin_cookie(mut self, name: impl Into<String>) -> Self {
        self.admin_cookie = name.into();
        self
    }
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("no {0} token available")]
    MissingCredential(AuthClass),
    #[error("unsupported HTTP method {0}")]
    UnsupportedMethod(String),
    #[error(transparent)]
    Path(#[from] SuiteError),
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
}

impl ExecutionError {
    /// Missing credentials skip a test; every other error fails it.
    pub fn is_skip(&self) -> bool {
        matches!(self, ExecutionError::MissingCredential(_))
    }
}

/// A completed round trip.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub url: String,
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub duration: Duration,
}

impl Exchange {
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
    }

    pub fn observation(&self) -> Observation<'_> {
        Observation {
            status: self.status,
            content_type: self.content_type(),
            body: &self.body,
        }
    }
}

pub async fn execute_descriptor(
    context: &ExecutionContext,
    descriptor: &EndpointDescriptor,
) -> Result<Exchange, ExecutionError> {
    let token = match descriptor.auth {
        AuthClass::None => None,
        class => Some(
            context
                .credentials
                .token_for(class)
                .ok_or(ExecutionError::MissingCredential(class))?,
        ),
    };

    let method = descriptor
        .method
        .to_http()
        .ok_or_else(|| ExecutionError::UnsupportedMethod(descriptor.method.to_string()))?;
    let path = descriptor.render_path(&context.placeholders)?;
    let url = endpoint_url(&context.base_url, &path);

    let mut request = context.client.request(method, &url);
    match (descriptor.auth, token) {
        (AuthClass::User, Some(token)) => request = request.bearer_auth(token),
        (AuthClass::Admin, Some(token)) => {
            let cookie = format!("{}={}", context.admin_cookie, token);
            request = request.header(header::COOKIE, cookie);
        }
        _ => {}
    }
    if descriptor.method.sends_body() {
        if let Some(body) = &descriptor.body {
            request = request.json(body);
        }
    }

    tracing::debug!(name = %descriptor.name, method = %descriptor.method, %url, "sending");
    let started = Instant::now();
    let transport = |err: reqwest::Error| ExecutionError::Transport {
        url: url.clone(),
        message: describe_transport_error(&err),
    };
    let response = request.send().await.map_err(transport)?;
    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let body = response.bytes().await.map_err(transport)?.to_vec();
    let duration = started.elapsed();
    tracing::debug!(
        name = %descriptor.name,
        status,
        elapsed_ms = duration.as_millis() as u64,
        "received"
    );

    Ok(Exchange {
        url,
        status,
        headers,
        body,
        duration,
    })
}

fn describe_transport_error(err: &reqwest::Error) -> String {
    let kind = if err.is_timeout() {
        "timed out"
    } else if err.is_connect() {
        "connection failed"
    } else {
        "transport error"
    };
    let mut detail = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        detail.push_str(": ");
        detail.push_str(&inner.to_string());
        source = inner.source();
    }
    format!("{kind} ({detail})")
}
