//! Filtering of `ssh-keys` metadata values.
//!
//! Compute Engine stores project and instance SSH keys as a newline-delimited
//! list of `username:key-material` entries. The helpers here strip the
//! entries that belong to a fixed set of users while leaving every other
//! line untouched.

use std::collections::BTreeSet;

/// Metadata key holding the newline-delimited SSH key entries.
pub const SSH_KEYS_METADATA_KEY: &str = "ssh-keys";

/// Users whose SSH key entries are removed during a sweep.
///
/// The set is built once at startup and shared read-only by every task.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RemovalSet {
    users: BTreeSet<String>,
}

impl RemovalSet {
    /// Builds a set from the provided user names.
    #[must_use]
    pub fn new<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            users: users.into_iter().map(Into::into).collect(),
        }
    }

    /// Parses a comma-separated list such as `alice,bob`.
    ///
    /// Entries are taken verbatim; whitespace is not trimmed.
    #[must_use]
    pub fn from_csv(value: &str) -> Self {
        Self::new(value.split(','))
    }

    /// Returns `true` when `user` is scheduled for removal.
    #[must_use]
    pub fn contains(&self, user: &str) -> bool {
        self.users.contains(user)
    }

    /// Returns `true` when no users are scheduled for removal.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Number of distinct users in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Iterates over the users in lexical order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.users.iter().map(String::as_str)
    }
}

/// Returns the user token of an `ssh-keys` line: everything before the first
/// `:`, or the whole line when it has none.
#[must_use]
pub fn key_owner(line: &str) -> &str {
    line.split_once(':').map_or(line, |(user, _)| user)
}

/// Removes every line of `value` whose owner is in `removal`.
///
/// Lines are split on `\n` only, kept in their original order, and never
/// trimmed or deduplicated.
#[must_use]
pub fn remove_user_keys(value: &str, removal: &RemovalSet) -> String {
    if removal.is_empty() {
        return value.to_owned();
    }

    let kept: Vec<&str> = value
        .split('\n')
        .filter(|line| {
            if removal.contains(key_owner(line)) {
                log::info!("remove key: {line}");
                false
            } else {
                true
            }
        })
        .collect();
    kept.join("\n")
}
