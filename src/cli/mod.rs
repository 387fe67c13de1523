//! Command-line interface definitions for the `keysweep` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Placeholder project used when `--projectID` is not supplied.
pub(crate) const DEFAULT_PROJECT_ID: &str = "my-project-id";

/// Placeholder user list used when `--users` is not supplied.
pub(crate) const DEFAULT_USERS: &str = "user";

/// Top-level CLI for the `keysweep` binary.
#[derive(Debug, Parser)]
#[command(
    name = "keysweep",
    version,
    about = "Remove users' SSH keys from every Compute Engine instance in a project"
)]
pub(crate) struct Cli {
    /// Project whose instances are swept.
    #[arg(long = "projectID", value_name = "PROJECT", default_value = DEFAULT_PROJECT_ID)]
    pub(crate) project_id: String,
    /// Users whose keys are removed, separated by commas (for example
    /// `user1,user2`).
    #[arg(long, value_name = "USERS", default_value = DEFAULT_USERS)]
    pub(crate) users: String,
    /// Maximum number of Compute API calls in flight. Overrides
    /// `max_concurrency` from configuration.
    #[arg(long, value_name = "N")]
    pub(crate) max_concurrency: Option<usize>,
    /// Exit with status 1 when zones cannot be listed or any zone reports a
    /// failed update. Without this flag failures are only logged.
    #[arg(long)]
    pub(crate) fail_on_error: bool,
}
