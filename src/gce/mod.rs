//! Compute Engine implementation of [`ComputeProvider`].
//!
//! Talks to the Compute Engine v1 REST API with a bearer token. List calls
//! follow `nextPageToken` until the listing is exhausted; metadata updates
//! submit the request and return without waiting on the resulting zone
//! operation.

mod token;
mod types;

use std::fmt;

use serde::de::DeserializeOwned;

use crate::command::ProcessCommandRunner;
use crate::config::ComputeConfig;
use crate::provider::{ComputeProvider, Instance, Metadata, ProviderError, ProviderFuture};

pub use token::resolve_access_token;
use types::{ErrorEnvelope, InstanceList, Page, ZoneList};

const USER_AGENT: &str = concat!("keysweep/", env!("CARGO_PKG_VERSION"));

/// Provider backed by the Compute Engine REST API.
#[derive(Clone)]
pub struct GceProvider {
    client: reqwest::Client,
    endpoint: String,
    token: String,
}

impl fmt::Debug for GceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GceProvider")
            .field("endpoint", &self.endpoint)
            .field("token", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl GceProvider {
    /// Builds a provider that authenticates with `token`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Transport`] when the HTTP client cannot be
    /// initialised.
    pub fn new(config: &ComputeConfig, token: impl Into<String>) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(transport_error)?;
        Ok(Self {
            client,
            endpoint: config.api_endpoint.trim().trim_end_matches('/').to_owned(),
            token: token.into(),
        })
    }

    /// Builds a provider, resolving the access token from configuration or
    /// the `gcloud` CLI.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Auth`] when no token can be obtained, or
    /// [`ProviderError::Transport`] when the HTTP client cannot be built.
    pub fn from_config(config: &ComputeConfig) -> Result<Self, ProviderError> {
        let token = resolve_access_token(config, &ProcessCommandRunner)?;
        Self::new(config, token)
    }

    fn zones_url(&self, project_id: &str) -> String {
        format!("{}/projects/{project_id}/zones", self.endpoint)
    }

    fn instances_url(&self, project_id: &str, zone: &str) -> String {
        format!(
            "{}/projects/{project_id}/zones/{zone}/instances",
            self.endpoint
        )
    }

    fn set_metadata_url(&self, project_id: &str, zone: &str, instance: &str) -> String {
        format!(
            "{}/projects/{project_id}/zones/{zone}/instances/{instance}/setMetadata",
            self.endpoint
        )
    }

    async fn list_all<P>(&self, url: &str, resource: &str) -> Result<Vec<P::Item>, ProviderError>
    where
        P: Page + DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self.client.get(url).bearer_auth(&self.token);
            if let Some(token) = page_token.as_deref() {
                request = request.query(&[("pageToken", token)]);
            }
            let response = request.send().await.map_err(transport_error)?;
            let body = successful_body(response).await?;
            let page: P = decode(&body, resource)?;
            let (mut batch, next) = page.into_parts();
            items.append(&mut batch);
            match next {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(items),
            }
        }
    }
}

impl ComputeProvider for GceProvider {
    fn list_zones<'a>(&'a self, project_id: &'a str) -> ProviderFuture<'a, Vec<String>> {
        Box::pin(async move {
            let url = self.zones_url(project_id);
            self.list_all::<ZoneList>(&url, "zones").await
        })
    }

    fn list_instances<'a>(
        &'a self,
        project_id: &'a str,
        zone: &'a str,
    ) -> ProviderFuture<'a, Vec<Instance>> {
        Box::pin(async move {
            let url = self.instances_url(project_id, zone);
            self.list_all::<InstanceList>(&url, "instances").await
        })
    }

    fn set_instance_metadata<'a>(
        &'a self,
        project_id: &'a str,
        zone: &'a str,
        instance: &'a str,
        metadata: &'a Metadata,
    ) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let url = self.set_metadata_url(project_id, zone, instance);
            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.token)
                .json(metadata)
                .send()
                .await
                .map_err(transport_error)?;
            successful_body(response).await?;
            Ok(())
        })
    }
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    ProviderError::Transport {
        message: err.to_string(),
    }
}

/// Returns the response body, converting non-success statuses into
/// [`ProviderError::Api`].
async fn successful_body(response: reqwest::Response) -> Result<String, ProviderError> {
    let status = response.status();
    let body = response.text().await.map_err(transport_error)?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(api_error(status.as_u16(), &body))
    }
}

/// Builds an API error, preferring the message from Google's error envelope.
fn api_error(status: u16, body: &str) -> ProviderError {
    let message = serde_json::from_str::<ErrorEnvelope>(body).map_or_else(
        |_| body.trim().to_owned(),
        |envelope| envelope.error.message,
    );
    ProviderError::Api { status, message }
}

fn decode<T: DeserializeOwned>(body: &str, resource: &str) -> Result<T, ProviderError> {
    serde_json::from_str(body).map_err(|err| ProviderError::Decode {
        resource: resource.to_owned(),
        message: err.to_string(),
    })
}
