//! Lease coordination engine.
//!
//! Every operation round-trips through the [`LeaseStore`]; the engine keeps no
//! lease state of its own, so any number of engines may share one store.

pub mod clock;
pub mod publisher;
pub mod reclaim;

pub use clock::{Clock, ManualClock, SystemClock};
pub use publisher::{CommandPublisher, NoopPublisher, Publisher, publisher_from_config};
pub use reclaim::{ReclaimTask, spawn_reclaim_task};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use uuid::Uuid;

use crate::config::{CommitRecovery, GatewayConfig};
use crate::error::{Error, Result};
use crate::store::{LeasePath, LeaseStore};
use crate::types::{Lease, LeaseState, LeaseView};

/// Outcome of one reclamation sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReclaimReport {
    pub examined: usize,
    pub reclaimed: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct LeaseEngine {
    config: Arc<GatewayConfig>,
    store: Arc<dyn LeaseStore>,
    publisher: Arc<dyn Publisher>,
    clock: Arc<dyn Clock>,
}

impl LeaseEngine {
    pub fn new(
        config: Arc<GatewayConfig>,
        store: Arc<dyn LeaseStore>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            config,
            store,
            publisher,
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn LeaseStore> {
        &self.store
    }

    /// Claims `path` in `repository` for `owner`.
    ///
    /// Fails with `PathConflict` when any path-holding lease in the repository
    /// is an ancestor, descendant or equal of `path`. Expired leases keep
    /// blocking until the reclamation sweep has released them.
    pub async fn acquire(&self, repository: &str, path: &str, owner: &str) -> Result<Lease> {
        if !self.config.repositories.contains_key(repository) {
            return Err(Error::NotFound(format!("repository {repository}")));
        }
        let path = LeasePath::parse(path)?;

        let candidates = self.store.get_by_path(repository, &path).await?;
        for candidate in &candidates {
            if !candidate.state.holds_path() {
                continue;
            }
            if LeasePath::parse(&candidate.path)?.overlaps(&path) {
                tracing::debug!(
                    repository,
                    path = %path,
                    blocking = %candidate.path,
                    "Lease request blocked"
                );
                return Err(Error::PathConflict(candidate.conflict_info()));
            }
        }

        let now = self.clock.now();
        let lease = Lease {
            token: Uuid::new_v4().to_string(),
            repository: repository.to_string(),
            path: path.to_string(),
            owner: owner.to_string(),
            created_at: now,
            expires_at: self.deadline(now)?,
            state: LeaseState::Active,
            payload_ref: None,
            version: 0,
        };

        // A sibling insert may have won since the read above; the store decides.
        let stored = self.store.insert(&lease).await?;

        tracing::info!(
            repository,
            path = %stored.path,
            owner,
            expires_at = %stored.expires_at,
            "Lease acquired"
        );
        Ok(stored)
    }

    pub async fn get(&self, token: &str) -> Result<Lease> {
        let lease = self.store.get(token).await?;
        if !lease.state.holds_path() {
            return Err(Error::NotFound(format!("lease {token}")));
        }
        Ok(lease)
    }

    pub async fn list(&self, repository: Option<&str>) -> Result<Vec<LeaseView>> {
        let mut views: Vec<LeaseView> = self
            .store
            .list(repository)
            .await?
            .iter()
            .map(Lease::view)
            .collect();
        views.sort_by(|a, b| (&a.repository, &a.path).cmp(&(&b.repository, &b.path)));
        Ok(views)
    }

    /// Publishes `payload_ref` under the lease and releases it on success.
    ///
    /// A failed publish leaves the lease `Committing` and returns `PublishFailed`.
    /// Every attempt pushes `expires_at` to a full TTL from its start, so the
    /// sweep's grace period never runs out under a publish that is still going.
    pub async fn commit(&self, token: &str, payload_ref: &str) -> Result<()> {
        if payload_ref.trim().is_empty() {
            return Err(Error::BadRequest("payload reference cannot be empty".into()));
        }
        let recovery = self.config.leases.commit_recovery;

        let lease = self
            .transition(token, |lease, now| {
                match lease.state {
                    LeaseState::Active if lease.is_expired(now) => return Err(Error::Expired),
                    LeaseState::Active => {}
                    LeaseState::Committing if recovery == CommitRecovery::Manual => {
                        return Err(Error::Committing(lease.token.clone()));
                    }
                    LeaseState::Committing => {
                        tracing::info!(
                            repository = %lease.repository,
                            path = %lease.path,
                            "Retrying publish for committing lease"
                        );
                    }
                    LeaseState::Released => {
                        return Err(Error::NotFound(format!("lease {}", lease.token)));
                    }
                }
                lease.state = LeaseState::Committing;
                lease.payload_ref = Some(payload_ref.to_string());
                lease.expires_at = self.deadline(now)?;
                Ok(())
            })
            .await?;

        if let Err(e) = self
            .publisher
            .publish(&lease.repository, &lease.path, payload_ref)
            .await
        {
            tracing::error!(
                repository = %lease.repository,
                path = %lease.path,
                payload_ref,
                "Publish failed, lease left committing: {e}"
            );
            return Err(match e {
                Error::PublishFailed(message) => Error::PublishFailed(message),
                other => Error::PublishFailed(other.to_string()),
            });
        }

        let released = self
            .transition(token, |lease, _| {
                if lease.state == LeaseState::Released {
                    return Err(Error::NotFound(format!("lease {}", lease.token)));
                }
                lease.state = LeaseState::Released;
                Ok(())
            })
            .await?;
        self.discard(&released).await;

        tracing::info!(
            repository = %released.repository,
            path = %released.path,
            payload_ref,
            "Lease committed"
        );
        Ok(())
    }

    /// Releases the lease on behalf of its owner without publishing anything.
    pub async fn cancel(&self, token: &str, owner: &str) -> Result<()> {
        let recovery = self.config.leases.commit_recovery;

        let released = self
            .transition(token, |lease, _| {
                match lease.state {
                    LeaseState::Released => {
                        return Err(Error::NotFound(format!("lease {}", lease.token)));
                    }
                    _ if lease.owner != owner => return Err(Error::Forbidden),
                    LeaseState::Committing if recovery != CommitRecovery::Manual => {
                        return Err(Error::Committing(lease.token.clone()));
                    }
                    LeaseState::Active | LeaseState::Committing => {}
                }
                lease.state = LeaseState::Released;
                Ok(())
            })
            .await?;
        self.discard(&released).await;

        tracing::info!(
            repository = %released.repository,
            path = %released.path,
            owner,
            "Lease cancelled"
        );
        Ok(())
    }

    /// Releases every expired `Active` lease (and, under `CommitRecovery::Reclaim`,
    /// every `Committing` lease past its grace period).
    ///
    /// Safe to run concurrently with requests and with sweeps on other instances:
    /// each release is a versioned write, so a lease touched since it was listed
    /// is skipped rather than released.
    pub async fn reclaim(&self) -> Result<ReclaimReport> {
        let now = self.clock.now();
        let expired = self.store.list_expired(now).await?;
        let mut report = ReclaimReport::default();

        for lease in expired {
            report.examined += 1;
            if !self.reclaimable(&lease, now) {
                report.skipped += 1;
                continue;
            }

            if lease.state != LeaseState::Released {
                let mut released = lease.clone();
                released.state = LeaseState::Released;
                match self.store.update(&released).await {
                    Ok(_) => {}
                    Err(Error::VersionConflict(_) | Error::NotFound(_)) => {
                        report.skipped += 1;
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(token = %lease.token, "Failed to reclaim lease: {e}");
                        report.failed += 1;
                        continue;
                    }
                }
            }

            match self.store.remove(&lease.token).await {
                Ok(()) => {
                    tracing::info!(
                        repository = %lease.repository,
                        path = %lease.path,
                        owner = %lease.owner,
                        state = %lease.state,
                        "Reclaimed expired lease"
                    );
                    report.reclaimed += 1;
                }
                Err(e) => {
                    tracing::warn!(token = %lease.token, "Failed to remove reclaimed lease: {e}");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    fn reclaimable(&self, lease: &Lease, now: DateTime<Utc>) -> bool {
        match lease.state {
            LeaseState::Active | LeaseState::Released => true,
            LeaseState::Committing => {
                self.config.leases.commit_recovery == CommitRecovery::Reclaim
                    && lease
                        .expires_at
                        .checked_add_signed(self.config.leases.committing_grace())
                        .is_some_and(|reclaim_at| reclaim_at <= now)
            }
        }
    }

    fn deadline(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        now.checked_add_signed(self.config.leases.ttl())
            .ok_or_else(|| Error::Config("leases.ttl_secs is out of range".into()))
    }

    /// Re-reads the lease and applies `apply` until the versioned write lands.
    ///
    /// Gives up with `VersionConflict` after `max_update_attempts` lost races.
    async fn transition<F>(&self, token: &str, mut apply: F) -> Result<Lease>
    where
        F: FnMut(&mut Lease, DateTime<Utc>) -> Result<()> + Send,
    {
        let attempts = self.config.leases.max_update_attempts.max(1);
        let mut attempt = 1;
        loop {
            let mut lease = self.store.get(token).await?;
            apply(&mut lease, self.clock.now())?;

            match self.store.update(&lease).await {
                Ok(stored) => return Ok(stored),
                Err(Error::VersionConflict(_)) if attempt < attempts => {
                    tracing::debug!(token, attempt, "Lease changed concurrently, retrying");
                    tokio::time::sleep(self.backoff()).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn backoff(&self) -> std::time::Duration {
        let base = self.config.leases.update_backoff();
        let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64);
        base + std::time::Duration::from_millis(jitter_ms)
    }

    /// Drops a released record. The path is already free at this point, so a
    /// failure only leaves a record for the next sweep to remove.
    async fn discard(&self, lease: &Lease) {
        if let Err(e) = self.store.remove(&lease.token).await {
            tracing::warn!(
                repository = %lease.repository,
                path = %lease.path,
                "Released lease not removed, leaving it to the sweep: {e}"
            );
        }
    }
}
