//! Project-wide removal of SSH keys from instance metadata.
//!
//! A sweep lists the project's zones, processes every zone concurrently, and
//! within each zone updates every instance concurrently. Each unit of work
//! reports exactly one outcome to its parent and nothing is retried or
//! cancelled once dispatched.
//!
//! Failures are handled asymmetrically. Failing to list the project's zones
//! aborts the sweep. Failing to list one zone's instances is logged and the
//! zone counts as handled, so one unreachable zone does not abandon the rest
//! of the run. Only rejected metadata updates mark a zone as failed.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};

use crate::keys::{RemovalSet, SSH_KEYS_METADATA_KEY, remove_user_keys};
use crate::provider::{
    ComputeProvider, Instance, Metadata, MetadataItem, ProviderError, ProviderFuture,
};

/// Errors that abort a sweep before any zone is processed.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SweepError {
    /// Raised when the project's zones cannot be listed.
    #[error("failed to list zones for project {project_id}: {source}")]
    ListZones {
        /// Project that was being swept.
        project_id: String,
        /// Underlying provider failure.
        #[source]
        source: ProviderError,
    },
}

/// A rejected metadata update for a single instance.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{instance}: {message}")]
pub struct InstanceFailure {
    /// Name of the instance whose update failed.
    pub instance: String,
    /// Description of the failure.
    pub message: String,
}

/// A zone in which at least one instance update failed.
///
/// The display text stays generic; the individual causes are kept in
/// [`ZoneFailure::failures`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error(
    "failed to remove ssh key in zone {zone}: {} of {attempted} instance updates failed",
    .failures.len()
)]
pub struct ZoneFailure {
    /// Zone name.
    pub zone: String,
    /// Number of instance updates dispatched in the zone.
    pub attempted: usize,
    /// Per-instance causes.
    pub failures: Vec<InstanceFailure>,
}

/// Successful outcome of processing one zone.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ZoneReport {
    /// Zone name.
    pub zone: String,
    /// Whether the zone's instances could be listed.
    pub listed: bool,
    /// Number of instances whose metadata was rewritten.
    pub instances_updated: usize,
}

/// Totals for a completed sweep.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SweepSummary {
    /// Number of zones processed.
    pub zones: usize,
    /// Zones whose instances could not be listed and were skipped.
    pub zones_unlisted: usize,
    /// Instances whose metadata update was accepted.
    pub instances_updated: usize,
    /// Instances whose metadata update was rejected.
    pub instances_failed: usize,
    /// Zones that reported at least one failed instance update.
    pub failed_zones: Vec<ZoneFailure>,
}

impl SweepSummary {
    /// Returns `true` when no zone reported a failure.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed_zones.is_empty()
    }

    fn record(&mut self, outcome: Result<ZoneReport, ZoneFailure>) {
        match outcome {
            Ok(report) => {
                if !report.listed {
                    self.zones_unlisted += 1;
                }
                self.instances_updated += report.instances_updated;
            }
            Err(failure) => {
                log::error!("{failure}");
                self.instances_updated += failure.attempted.saturating_sub(failure.failures.len());
                self.instances_failed += failure.failures.len();
                self.failed_zones.push(failure);
            }
        }
    }
}

/// Copies `metadata`, filtering the `ssh-keys` item through
/// [`remove_user_keys`].
///
/// Every other item, the item order, and the fingerprint are preserved.
#[must_use]
pub fn rebuild_metadata(metadata: &Metadata, removal: &RemovalSet) -> Metadata {
    let items = metadata
        .items
        .iter()
        .map(|item| match item.value.as_deref() {
            Some(value) if item.key == SSH_KEYS_METADATA_KEY => MetadataItem {
                key: item.key.clone(),
                value: Some(remove_user_keys(value, removal)),
            },
            _ => item.clone(),
        })
        .collect();
    Metadata {
        fingerprint: metadata.fingerprint.clone(),
        items,
    }
}

/// Removes SSH keys for a set of users from every instance in a project.
#[derive(Debug)]
pub struct KeySweeper<P> {
    provider: Arc<P>,
    limiter: Arc<Semaphore>,
}

impl<P> KeySweeper<P>
where
    P: ComputeProvider + Send + Sync + 'static,
{
    /// Creates a sweeper that keeps at most `max_concurrency` provider calls
    /// in flight.
    #[must_use]
    pub fn new(provider: P, max_concurrency: NonZeroUsize) -> Self {
        Self {
            provider: Arc::new(provider),
            limiter: Arc::new(Semaphore::new(max_concurrency.get())),
        }
    }

    /// Sweeps `project_id`, removing the keys of every user in `removal`.
    ///
    /// Zone failures are logged and collected in the summary; they do not
    /// turn into an error. Updates already applied are never rolled back.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::ListZones`] when the project's zones cannot be
    /// listed. No zone is processed in that case.
    pub async fn sweep(
        &self,
        project_id: &str,
        removal: &RemovalSet,
    ) -> Result<SweepSummary, SweepError> {
        let ctx = Arc::new(SweepContext {
            provider: Arc::clone(&self.provider),
            limiter: Arc::clone(&self.limiter),
            project_id: project_id.to_owned(),
            removal: removal.clone(),
        });

        let zones = ctx
            .limited(ctx.provider.list_zones(&ctx.project_id))
            .await
            .map_err(|source| SweepError::ListZones {
                project_id: project_id.to_owned(),
                source,
            })?;
        log::info!("found {} zones in project {project_id}", zones.len());

        let mut summary = SweepSummary {
            zones: zones.len(),
            ..SweepSummary::default()
        };
        let mut tasks = JoinSet::new();
        let mut names = HashMap::new();
        for zone in zones {
            let handle = tasks.spawn(sweep_zone(Arc::clone(&ctx), zone.clone()));
            names.insert(handle.id(), zone);
        }
        while let Some(joined) = tasks.join_next_with_id().await {
            let outcome = match joined {
                Ok((_, outcome)) => outcome,
                Err(err) => {
                    let zone = task_name(&mut names, &err);
                    log::error!("zone task for {zone} failed: {err}");
                    Err(ZoneFailure {
                        zone,
                        attempted: 0,
                        failures: Vec::new(),
                    })
                }
            };
            summary.record(outcome);
        }
        Ok(summary)
    }
}

/// State shared read-only by every task of one sweep.
struct SweepContext<P> {
    provider: Arc<P>,
    limiter: Arc<Semaphore>,
    project_id: String,
    removal: RemovalSet,
}

impl<P> SweepContext<P> {
    /// Awaits `call` while holding a limiter permit.
    async fn limited<T>(&self, call: ProviderFuture<'_, T>) -> Result<T, ProviderError> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|err| ProviderError::Transport {
                message: err.to_string(),
            })?;
        call.await
    }
}

async fn sweep_zone<P>(ctx: Arc<SweepContext<P>>, zone: String) -> Result<ZoneReport, ZoneFailure>
where
    P: ComputeProvider + Send + Sync + 'static,
{
    let instances = match ctx
        .limited(ctx.provider.list_instances(&ctx.project_id, &zone))
        .await
    {
        Ok(instances) => instances,
        Err(err) => {
            log::warn!("failed to list instances in zone {zone}: {err}");
            return Ok(ZoneReport {
                zone,
                listed: false,
                instances_updated: 0,
            });
        }
    };
    if instances.is_empty() {
        log::info!("no instances found in zone {zone}");
        return Ok(ZoneReport {
            zone,
            listed: true,
            instances_updated: 0,
        });
    }

    let attempted = instances.len();
    let mut tasks = JoinSet::new();
    let mut names = HashMap::new();
    for instance in instances {
        log::info!("instance: {zone}/{}", instance.name);
        let name = instance.name.clone();
        let instance_ctx = Arc::clone(&ctx);
        let instance_zone = zone.clone();
        let handle = tasks
            .spawn(async move { update_instance(&instance_ctx, &instance_zone, instance).await });
        names.insert(handle.id(), name);
    }

    let mut failures = Vec::new();
    while let Some(joined) = tasks.join_next_with_id().await {
        match joined {
            Ok((_, Ok(()))) => {}
            Ok((_, Err(failure))) => failures.push(failure),
            Err(err) => {
                let instance = task_name(&mut names, &err);
                log::error!("update task for {zone}/{instance} failed: {err}");
                failures.push(InstanceFailure {
                    instance,
                    message: format!("update task failed: {err}"),
                });
            }
        }
    }

    if failures.is_empty() {
        Ok(ZoneReport {
            zone,
            listed: true,
            instances_updated: attempted,
        })
    } else {
        Err(ZoneFailure {
            zone,
            attempted,
            failures,
        })
    }
}

/// Looks up the unit a failed task was working on.
fn task_name(names: &mut HashMap<Id, String>, err: &JoinError) -> String {
    names
        .remove(&err.id())
        .unwrap_or_else(|| String::from("<unknown>"))
}

async fn update_instance<P>(
    ctx: &SweepContext<P>,
    zone: &str,
    instance: Instance,
) -> Result<(), InstanceFailure>
where
    P: ComputeProvider,
{
    let metadata = rebuild_metadata(&instance.metadata, &ctx.removal);
    ctx.limited(
        ctx.provider
            .set_instance_metadata(&ctx.project_id, zone, &instance.name, &metadata),
    )
    .await
    .map_err(|err| {
        log::error!("failed to set ssh-keys on {zone}/{}: {err}", instance.name);
        InstanceFailure {
            instance: instance.name.clone(),
            message: err.to_string(),
        }
    })
}

#[cfg(test)]
mod tests;
