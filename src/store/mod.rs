mod embedded;
#[cfg(feature = "etcd")]
mod etcd;
pub mod path;
mod schema;

pub use embedded::EmbeddedStore;
#[cfg(feature = "etcd")]
pub use etcd::EtcdStore;
pub use path::LeasePath;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::{StoreBackend, StoreConfig};
use crate::error::{Error, Result};
use crate::types::Lease;

/// LeaseStore is the single source of truth for outstanding leases.
///
/// Implementations must make `insert` and `update` atomic with respect to every
/// concurrent caller, in this process or any other sharing the same backend.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Adds `lease` unless a path-holding lease in the same repository overlaps it.
    async fn insert(&self, lease: &Lease) -> Result<Lease>;

    async fn get(&self, token: &str) -> Result<Lease>;

    /// Path-holding leases in `repository` whose paths overlap `path`.
    async fn get_by_path(&self, repository: &str, path: &LeasePath) -> Result<Vec<Lease>>;

    /// Path-holding leases, optionally restricted to one repository.
    async fn list(&self, repository: Option<&str>) -> Result<Vec<Lease>>;

    /// Writes `lease` if the stored version still equals `lease.version`.
    ///
    /// Returns the stored lease carrying its new version. Fails with
    /// `VersionConflict` when another writer got there first.
    async fn update(&self, lease: &Lease) -> Result<Lease>;

    /// Idempotent: removing an absent token succeeds.
    async fn remove(&self, token: &str) -> Result<()>;

    /// Leases whose `expires_at` is at or before `now`.
    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Lease>>;

    async fn close(&self) -> Result<()>;
}

/// Builds the backend named by the configuration.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn LeaseStore>> {
    match config.backend {
        StoreBackend::Embedded => {
            std::fs::create_dir_all(&config.data_dir)?;
            let store = EmbeddedStore::open(config.journal_path())?
                .with_compact_every(config.compact_every);
            Ok(Arc::new(store))
        }
        #[cfg(feature = "etcd")]
        StoreBackend::Etcd => {
            let store = EtcdStore::connect(&config.etcd).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "etcd"))]
        StoreBackend::Etcd => Err(Error::Config(
            "etcd backend requested but leasegate was built without the `etcd` feature".into(),
        )),
    }
}

/// Checks that `lease` may be written as a state change of `current`.
pub(crate) fn check_transition(current: &Lease, next: &Lease) -> Result<()> {
    if current.version != next.version {
        return Err(Error::VersionConflict(next.token.clone()));
    }
    if current.repository != next.repository || current.path != next.path {
        return Err(Error::BadRequest(
            "lease repository and path are immutable".to_string(),
        ));
    }
    if !current.state.can_transition_to(next.state) {
        return Err(Error::BadRequest(format!(
            "lease cannot move from {} to {}",
            current.state, next.state
        )));
    }
    Ok(())
}
