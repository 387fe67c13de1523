//! Provider abstraction over the compute control plane.
//!
//! The sweep only needs three calls: enumerate zones, enumerate the instances
//! in a zone, and replace an instance's metadata. Keeping them behind a trait
//! lets the orchestration run against the real REST adapter or an in-memory
//! fake.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single `key`/`value` entry in instance metadata.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MetadataItem {
    /// Metadata key, for example `ssh-keys` or `startup-script`.
    pub key: String,
    /// Metadata value; the API omits it for empty entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl MetadataItem {
    /// Builds an item with a value.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }
}

/// Instance metadata as returned by, and submitted to, the provider.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Metadata {
    /// Opaque version token that must be echoed back unchanged on update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// Ordered metadata entries.
    #[serde(default)]
    pub items: Vec<MetadataItem>,
}

/// A virtual machine as seen by the sweep.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct Instance {
    /// Instance name, unique within its zone.
    pub name: String,
    /// Metadata attached to the instance.
    #[serde(default)]
    pub metadata: Metadata,
}

/// Errors raised by compute providers.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProviderError {
    /// Raised when credentials cannot be obtained.
    #[error("authentication failed: {message}")]
    Auth {
        /// Human readable description of the failure.
        message: String,
    },
    /// Raised when the request never produced an HTTP response.
    #[error("transport error: {message}")]
    Transport {
        /// Message reported by the HTTP client.
        message: String,
    },
    /// Raised when the API answers with a non-success status.
    #[error("api error (status {status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Message extracted from the error payload.
        message: String,
    },
    /// Raised when a response body cannot be decoded.
    #[error("failed to decode {resource} response: {message}")]
    Decode {
        /// Resource being decoded (for example `zones`).
        resource: String,
        /// Decoder error message.
        message: String,
    },
}

/// Future returned by provider operations.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Control-plane operations consumed by the sweep.
pub trait ComputeProvider {
    /// Lists the names of every zone visible to the project.
    fn list_zones<'a>(&'a self, project_id: &'a str) -> ProviderFuture<'a, Vec<String>>;

    /// Lists the instances in a single zone.
    fn list_instances<'a>(
        &'a self,
        project_id: &'a str,
        zone: &'a str,
    ) -> ProviderFuture<'a, Vec<Instance>>;

    /// Replaces the metadata of one instance.
    ///
    /// The provider rejects the request when `metadata.fingerprint` no longer
    /// matches the instance's current metadata.
    fn set_instance_metadata<'a>(
        &'a self,
        project_id: &'a str,
        zone: &'a str,
        instance: &'a str,
        metadata: &'a Metadata,
    ) -> ProviderFuture<'a, ()>;
}
