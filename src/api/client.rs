//! REST Transport
//!
//! Client-side terminal stage forwarding calls to a remote registry over the
//! REST API. Call metadata travels as `x-registry-` headers in both
//! directions; the caller token is sent as a bearer token.

use crate::api::rest::ApiErrorResponse;
use crate::api::{is_metadata_key, BEARER_PREFIX};
use crate::chain::{Next, Stage};
use crate::domain::{CallContext, Query, RegistryEntry};
use crate::error::{Error, Result};
use crate::registry::{FindStream, RegistryEvent};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Response};
use serde::Serialize;
use std::marker::PhantomData;
use std::time::Duration;
use tracing::debug;

/// Configuration for the REST transport
#[derive(Debug, Clone)]
pub struct RestClientConfig {
    /// Base URL of the remote registry, e.g. `http://127.0.0.1:5002`
    pub base_url: String,
    /// Timeout of a single HTTP request
    pub timeout: Duration,
    /// Token sent when the call context carries none
    pub token: Option<String>,
}

impl Default for RestClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5002".to_string(),
            timeout: Duration::from_secs(15),
            token: None,
        }
    }
}

impl RestClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }
}

/// Terminal stage calling a remote registry
pub struct RestTransport<E: RegistryEntry> {
    client: Client,
    config: RestClientConfig,
    _kind: PhantomData<fn() -> E>,
}

impl<E: RegistryEntry> std::fmt::Debug for RestTransport<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestTransport")
            .field("kind", &E::KIND)
            .field("base_url", &self.config.base_url)
            .finish()
    }
}

impl<E: RegistryEntry> RestTransport<E> {
    pub fn new(config: RestClientConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            config,
            _kind: PhantomData,
        })
    }

    fn url(&self, operation: &str) -> String {
        format!(
            "{}/v1/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            E::KIND,
            operation
        )
    }

    fn headers(&self, ctx: &CallContext) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (key, value) in &ctx.metadata {
            if !is_metadata_key(key) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }

        let token = ctx.token.as_ref().or(self.config.token.as_ref());
        if let Some(token) = token {
            if let Ok(value) = HeaderValue::from_str(&format!("{}{}", BEARER_PREFIX, token)) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }

    /// Issue one call, honouring the context's cancellation
    async fn call(
        &self,
        ctx: &mut CallContext,
        operation: &str,
        body: &impl Serialize,
    ) -> Result<Response> {
        let request = self
            .client
            .post(self.url(operation))
            .headers(self.headers(ctx))
            .json(body)
            .send();

        let response = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
            response = request => response?,
        };
        debug!(kind = %E::KIND, operation, status = %response.status(), "Remote call completed");

        // Response metadata replaces what was sent
        ctx.metadata.retain(|key, _| !is_metadata_key(key));
        for (name, value) in response.headers() {
            if is_metadata_key(name.as_str()) {
                if let Ok(value) = value.to_str() {
                    ctx.metadata.insert(name.as_str().to_string(), value.to_string());
                }
            }
        }

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(remote_error(response).await)
        }
    }
}

/// Turn an error response into [`Error::Remote`]
async fn remote_error(response: Response) -> Error {
    let status = response.status().as_u16();
    match response.json::<ApiErrorResponse>().await {
        Ok(body) => Error::Remote {
            status,
            code: body.error,
            message: body.message,
        },
        Err(e) => Error::Remote {
            status,
            code: "unknown".to_string(),
            message: e.to_string(),
        },
    }
}

#[async_trait]
impl<E: RegistryEntry> Stage<E> for RestTransport<E> {
    async fn register(&self, ctx: &mut CallContext, entry: E, _next: Next<E>) -> Result<E> {
        let response = self.call(ctx, "register", &entry).await?;
        Ok(response.json::<E>().await?)
    }

    async fn find(
        &self,
        ctx: &mut CallContext,
        query: Query<E>,
        _next: Next<E>,
    ) -> Result<FindStream<E>> {
        if query.watch {
            return Err(Error::Validation("watch is not supported over REST".into()));
        }
        let response = self.call(ctx, "find", &query).await?;
        let entries = response.json::<Vec<E>>().await?;
        Ok(stream::iter(
            entries
                .into_iter()
                .map(|entry| Ok(RegistryEvent::added(entry, 0))),
        )
        .boxed())
    }

    async fn unregister(&self, ctx: &mut CallContext, entry: E, _next: Next<E>) -> Result<()> {
        self.call(ctx, "unregister", &entry).await?;
        Ok(())
    }
}
