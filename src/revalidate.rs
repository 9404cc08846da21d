//! Best-effort cache invalidation on the public site after a short goes live.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub const AUTO_PUBLISHED_EVENT: &str = "short_auto_published";
pub const MANUAL_PUBLISHED_EVENT: &str = "short_published";

pub const AFFECTED_PATHS: [&str; 3] = ["/", "/shorts", "/sitemap.xml"];

#[derive(Error, Debug)]
pub enum InvalidationError {
    #[error("revalidation request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("revalidation endpoint returned {0}")]
    Rejected(u16),

    #[error("invalid revalidation endpoint {0}")]
    InvalidEndpoint(String),
}

#[async_trait]
pub trait Invalidator: Send + Sync {
    async fn invalidate(&self, event: &str) -> Result<(), InvalidationError>;
}

#[derive(Serialize)]
struct RevalidatePayload<'a> {
    #[serde(rename = "type")]
    event: &'a str,
    paths: &'a [&'a str],
}

pub struct HttpInvalidator {
    client: reqwest::Client,
    endpoint: String,
    secret: String,
}

impl HttpInvalidator {
    pub fn new(site_url: &str, secret: &str) -> Result<Self, InvalidationError> {
        let endpoint = format!("{}/api/revalidate", site_url.trim_end_matches('/'));
        reqwest::Url::parse(&endpoint)
            .map_err(|_| InvalidationError::InvalidEndpoint(endpoint.clone()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            secret: secret.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Invalidator for HttpInvalidator {
    #[tracing::instrument(name = "revalidate.http", skip(self), fields(http.url = %self.endpoint))]
    async fn invalidate(&self, event: &str) -> Result<(), InvalidationError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.secret)
            .json(&RevalidatePayload {
                event,
                paths: &AFFECTED_PATHS,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(InvalidationError::Rejected(status.as_u16()));
        }

        Ok(())
    }
}

/// Used when the site URL or the shared secret is not configured.
pub struct NoopInvalidator;

#[async_trait]
impl Invalidator for NoopInvalidator {
    async fn invalidate(&self, event: &str) -> Result<(), InvalidationError> {
        tracing::debug!(event, "Revalidation not configured, skipping");
        Ok(())
    }
}

pub fn from_settings(site_url: Option<&str>, secret: Option<&str>) -> Arc<dyn Invalidator> {
    match (site_url, secret) {
        (Some(url), Some(secret)) => match HttpInvalidator::new(url, secret) {
            Ok(invalidator) => Arc::new(invalidator),
            Err(e) => {
                tracing::error!(error = %e, "Revalidation client unavailable, revalidation disabled");
                Arc::new(NoopInvalidator)
            }
        },
        _ => {
            tracing::warn!("SITE_URL or REVALIDATE_SECRET missing, revalidation disabled");
            Arc::new(NoopInvalidator)
        }
    }
}
