use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseState {
    Active,
    /// Payload received, downstream publish pending or failed.
    Committing,
    Released,
}

impl LeaseState {
    /// Active and committing leases hold their path; released ones do not.
    #[must_use]
    pub fn holds_path(self) -> bool {
        matches!(self, Self::Active | Self::Committing)
    }

    #[must_use]
    pub fn can_transition_to(self, next: LeaseState) -> bool {
        matches!(
            (self, next),
            (Self::Active, Self::Committing)
                | (Self::Active, Self::Released)
                | (Self::Committing, Self::Committing)
                | (Self::Committing, Self::Released)
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Committing => "committing",
            Self::Released => "released",
        }
    }
}

impl std::fmt::Display for LeaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub token: String,
    pub repository: String,
    /// Canonical lease path, `/` for the whole repository.
    pub path: String,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub state: LeaseState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_ref: Option<String>,
    /// Optimistic concurrency stamp assigned by the store, not persisted in the record.
    #[serde(skip)]
    pub version: u64,
}

impl Lease {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    #[must_use]
    pub fn view(&self) -> LeaseView {
        LeaseView::from(self)
    }

    #[must_use]
    pub fn conflict_info(&self) -> ConflictInfo {
        ConflictInfo {
            repository: self.repository.clone(),
            path: self.path.clone(),
            owner: self.owner.clone(),
            expires_at: self.expires_at,
        }
    }
}

/// The caller-visible projection of a lease. Never carries the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseView {
    pub repository: String,
    pub path: String,
    pub owner: String,
    pub state: LeaseState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<&Lease> for LeaseView {
    fn from(lease: &Lease) -> Self {
        Self {
            repository: lease.repository.clone(),
            path: lease.path.clone(),
            owner: lease.owner.clone(),
            state: lease.state,
            created_at: lease.created_at,
            expires_at: lease.expires_at,
        }
    }
}

/// Describes the lease that blocked an acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictInfo {
    pub repository: String,
    pub path: String,
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub key_ids: Vec<String>,
}
