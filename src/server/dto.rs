use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Lease, LeaseState};

#[derive(Debug, Serialize, Deserialize)]
pub struct AcquireLeaseRequest {
    pub repository: String,
    #[serde(default = "root_path")]
    pub path: String,
}

fn root_path() -> String {
    "/".to_string()
}

/// Returned once, on acquisition. The token is the capability for commit and cancel.
#[derive(Debug, Serialize, Deserialize)]
pub struct LeaseHandle {
    pub token: String,
    pub repository: String,
    pub path: String,
    pub owner: String,
    pub state: LeaseState,
    pub expires_at: DateTime<Utc>,
}

impl From<Lease> for LeaseHandle {
    fn from(lease: Lease) -> Self {
        Self {
            token: lease.token,
            repository: lease.repository,
            path: lease.path,
            owner: lease.owner,
            state: lease.state,
            expires_at: lease.expires_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommitLeaseRequest {
    pub payload_ref: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListLeasesParams {
    #[serde(default)]
    pub repository: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Ack {
    pub token: String,
    pub state: LeaseState,
}
