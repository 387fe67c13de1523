//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, MutexGuard as StdMutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};

use crate::command::{CommandError, CommandOutput, CommandRunner};
use crate::keys::SSH_KEYS_METADATA_KEY;
use crate::provider::{
    ComputeProvider, Instance, Metadata, MetadataItem, ProviderError, ProviderFuture,
};

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: std::rc::Rc<std::cell::RefCell<VecDeque<CommandOutput>>>,
    invocations: std::rc::Rc<std::cell::RefCell<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.borrow_mut().push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| CommandError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// A call received by [`FakeProvider`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProviderCall {
    /// `list_zones` was invoked.
    ListZones {
        /// Project passed by the caller.
        project_id: String,
    },
    /// `list_instances` was invoked.
    ListInstances {
        /// Project passed by the caller.
        project_id: String,
        /// Zone passed by the caller.
        zone: String,
    },
    /// `set_instance_metadata` was invoked.
    SetMetadata {
        /// Project passed by the caller.
        project_id: String,
        /// Zone passed by the caller.
        zone: String,
        /// Instance passed by the caller.
        instance: String,
        /// Metadata submitted by the caller.
        metadata: Metadata,
    },
}

#[derive(Debug, Default)]
struct FakeState {
    zones: Vec<String>,
    zones_error: Option<ProviderError>,
    instances: BTreeMap<String, Vec<Instance>>,
    instance_errors: BTreeMap<String, ProviderError>,
    rejected_updates: BTreeSet<String>,
    panicking_listings: BTreeSet<String>,
    panicking_updates: BTreeSet<String>,
    call_delay: Option<Duration>,
    calls: Vec<ProviderCall>,
    in_flight: usize,
    peak_in_flight: usize,
}

/// In-memory [`ComputeProvider`] with scripted listings and failures.
///
/// Clones share state so a test can keep a handle after moving the provider
/// into a sweeper.
#[derive(Clone, Debug, Default)]
pub struct FakeProvider {
    state: Arc<std::sync::Mutex<FakeState>>,
}

impl FakeProvider {
    /// Creates a provider with no zones.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> StdMutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets the zones returned by `list_zones`.
    pub fn set_zones(&self, zones: &[&str]) {
        self.state().zones = zones.iter().map(|zone| (*zone).to_owned()).collect();
    }

    /// Makes `list_zones` fail with `error`.
    pub fn fail_zones(&self, error: ProviderError) {
        self.state().zones_error = Some(error);
    }

    /// Adds an instance to `zone`.
    pub fn add_instance(&self, zone: &str, instance: Instance) {
        self.state()
            .instances
            .entry(zone.to_owned())
            .or_default()
            .push(instance);
    }

    /// Makes `list_instances` fail for `zone`.
    pub fn fail_instances(&self, zone: &str, error: ProviderError) {
        self.state().instance_errors.insert(zone.to_owned(), error);
    }

    /// Makes `set_instance_metadata` fail for the named instance.
    pub fn reject_update(&self, instance: &str) {
        self.state().rejected_updates.insert(instance.to_owned());
    }

    /// Makes `list_instances` panic for `zone`.
    pub fn panic_on_listing(&self, zone: &str) {
        self.state().panicking_listings.insert(zone.to_owned());
    }

    /// Makes `set_instance_metadata` panic for the named instance.
    pub fn panic_on_update(&self, instance: &str) {
        self.state().panicking_updates.insert(instance.to_owned());
    }

    /// Delays every call so concurrent calls overlap.
    pub fn set_call_delay(&self, delay: Duration) {
        self.state().call_delay = Some(delay);
    }

    /// Returns every call received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.state().calls.clone()
    }

    /// Returns the metadata updates received so far as
    /// `(zone, instance, metadata)` tuples.
    #[must_use]
    pub fn updates(&self) -> Vec<(String, String, Metadata)> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                ProviderCall::SetMetadata {
                    zone,
                    instance,
                    metadata,
                    ..
                } => Some((zone.clone(), instance.clone(), metadata.clone())),
                _ => None,
            })
            .collect()
    }

    /// Returns the number of `list_instances` calls received so far.
    #[must_use]
    pub fn instance_listings(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| matches!(call, ProviderCall::ListInstances { .. }))
            .count()
    }

    /// Highest number of calls that were in progress at the same time.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.state().peak_in_flight
    }

    async fn enter(&self, call: ProviderCall) {
        let delay = {
            let mut state = self.state();
            state.calls.push(call);
            state.in_flight += 1;
            state.peak_in_flight = state.peak_in_flight.max(state.in_flight);
            state.call_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn leave(&self) {
        let mut state = self.state();
        state.in_flight = state.in_flight.saturating_sub(1);
    }
}

impl ComputeProvider for FakeProvider {
    fn list_zones<'a>(&'a self, project_id: &'a str) -> ProviderFuture<'a, Vec<String>> {
        Box::pin(async move {
            self.enter(ProviderCall::ListZones {
                project_id: project_id.to_owned(),
            })
            .await;
            let result = {
                let state = self.state();
                state
                    .zones_error
                    .clone()
                    .map_or_else(|| Ok(state.zones.clone()), Err)
            };
            self.leave();
            result
        })
    }

    fn list_instances<'a>(
        &'a self,
        project_id: &'a str,
        zone: &'a str,
    ) -> ProviderFuture<'a, Vec<Instance>> {
        Box::pin(async move {
            self.enter(ProviderCall::ListInstances {
                project_id: project_id.to_owned(),
                zone: zone.to_owned(),
            })
            .await;
            let (result, panics) = {
                let state = self.state();
                let result = state.instance_errors.get(zone).cloned().map_or_else(
                    || Ok(state.instances.get(zone).cloned().unwrap_or_default()),
                    Err,
                );
                (result, state.panicking_listings.contains(zone))
            };
            self.leave();
            if panics {
                panic!("listing instances in {zone} panicked");
            }
            result
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
            self.enter(ProviderCall::SetMetadata {
                project_id: project_id.to_owned(),
                zone: zone.to_owned(),
                instance: instance.to_owned(),
                metadata: metadata.clone(),
            })
            .await;
            let (rejected, panics) = {
                let state = self.state();
                (
                    state.rejected_updates.contains(instance),
                    state.panicking_updates.contains(instance),
                )
            };
            self.leave();
            if panics {
                panic!("updating {zone}/{instance} panicked");
            }
            if rejected {
                Err(ProviderError::Api {
                    status: 412,
                    message: String::from(
                        "Supplied fingerprint does not match current metadata fingerprint.",
                    ),
                })
            } else {
                Ok(())
            }
        })
    }
}

/// Builds an instance whose metadata holds `ssh_keys` plus an unrelated
/// `startup-script` item on either side.
#[must_use]
pub fn instance_with_keys(name: &str, fingerprint: &str, ssh_keys: &str) -> Instance {
    Instance {
        name: name.to_owned(),
        metadata: Metadata {
            fingerprint: Some(fingerprint.to_owned()),
            items: vec![
                MetadataItem::new("startup-script", "#!/bin/sh\necho boot"),
                MetadataItem::new(SSH_KEYS_METADATA_KEY, ssh_keys),
                MetadataItem::new("enable-oslogin", "FALSE"),
            ],
        },
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
