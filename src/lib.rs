//! Core library for the `keysweep` SSH key removal tool.
//!
//! The crate filters users' entries out of Compute Engine `ssh-keys`
//! metadata and applies the result to every instance of a project, fanning
//! out across zones and instances concurrently behind a provider
//! abstraction.

pub mod command;
pub mod config;
pub mod gce;
pub mod keys;
pub mod provider;
pub mod sweep;
pub mod test_support;

pub use command::{CommandError, CommandOutput, CommandRunner, ProcessCommandRunner};
pub use config::{ComputeConfig, ConfigError};
pub use gce::GceProvider;
pub use keys::{RemovalSet, SSH_KEYS_METADATA_KEY, remove_user_keys};
pub use provider::{ComputeProvider, Instance, Metadata, MetadataItem, ProviderError};
pub use sweep::{
    InstanceFailure, KeySweeper, SweepError, SweepSummary, ZoneFailure, ZoneReport,
    rebuild_metadata,
};
