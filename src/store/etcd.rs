//! etcd v3 backend.
//!
//! Layout under the configured prefix:
//!
//! - `{prefix}/leases/{token}` holds the JSON lease record. Its `mod_revision`
//!   is the lease version.
//! - `{prefix}/paths/{repository}{index_key}` holds the token of the lease that
//!   owns that path.
//!
//! An insert is a single transaction guarded on the absence of every ancestor
//! index key and of every key under the path's own index key, so two gateways
//! racing for overlapping paths cannot both succeed.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use etcd_client::{
    Client, Compare, CompareOp, ConnectOptions, GetOptions, KeyValue, KvClient, Txn, TxnOp,
};

use super::{LeasePath, LeaseStore, check_transition};
use crate::config::EtcdConfig;
use crate::error::{Error, Result};
use crate::types::Lease;

#[derive(Clone)]
pub struct EtcdStore {
    kv: KvClient,
    prefix: String,
    timeout: Duration,
}

impl EtcdStore {
    pub async fn connect(config: &EtcdConfig) -> Result<Self> {
        let options = ConnectOptions::new()
            .with_timeout(config.timeout())
            .with_connect_timeout(config.connect_timeout());

        let client = tokio::time::timeout(
            config.connect_timeout(),
            Client::connect(&config.endpoints, Some(options)),
        )
        .await
        .map_err(|_| Error::Unavailable("timed out connecting to etcd".to_string()))?
        .map_err(|e| Error::Unavailable(format!("cannot connect to etcd: {e}")))?;

        tracing::info!(endpoints = ?config.endpoints, prefix = %config.prefix, "Connected to etcd");

        Ok(Self {
            kv: client.kv_client(),
            prefix: config.prefix.trim_end_matches('/').to_string(),
            timeout: config.timeout(),
        })
    }

    fn lease_key(&self, token: &str) -> String {
        format!("{}/leases/{token}", self.prefix)
    }

    fn leases_prefix(&self) -> String {
        format!("{}/leases/", self.prefix)
    }

    fn path_key(&self, repository: &str, index_key: &str) -> String {
        format!("{}/paths/{repository}{index_key}", self.prefix)
    }

    async fn bounded<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, etcd_client::Error>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(Error::Unavailable(format!("etcd {op} failed: {e}"))),
            Err(_) => Err(Error::Unavailable(format!(
                "etcd {op} timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }

    async fn fetch(&self, token: &str) -> Result<Option<Lease>> {
        let mut kv = self.kv.clone();
        let resp = self
            .bounded("get", kv.get(self.lease_key(token), None))
            .await?;
        resp.kvs().first().map(decode).transpose()
    }

    async fn fetch_all(&self) -> Result<Vec<Lease>> {
        let mut kv = self.kv.clone();
        let resp = self
            .bounded(
                "range",
                kv.get(self.leases_prefix(), Some(GetOptions::new().with_prefix())),
            )
            .await?;
        resp.kvs().iter().map(decode).collect()
    }

    /// Tokens stored on the ancestors of `path`, on `path` itself and below it.
    async fn overlapping_tokens(&self, repository: &str, path: &LeasePath) -> Result<Vec<String>> {
        let mut kv = self.kv.clone();
        let mut tokens = Vec::new();

        for ancestor in path.ancestor_keys() {
            let resp = self
                .bounded("get", kv.get(self.path_key(repository, &ancestor), None))
                .await?;
            tokens.extend(resp.kvs().iter().map(token_of));
        }

        let own = self.path_key(repository, &path.index_key());
        let resp = self
            .bounded("range", kv.get(own, Some(GetOptions::new().with_prefix())))
            .await?;
        tokens.extend(resp.kvs().iter().map(token_of));
        Ok(tokens)
    }

    async fn overlapping(&self, repository: &str, path: &LeasePath) -> Result<Vec<Lease>> {
        let mut leases = Vec::new();
        for token in self.overlapping_tokens(repository, path).await? {
            if let Some(lease) = self.fetch(&token).await? {
                if lease.state.holds_path() {
                    leases.push(lease);
                }
            }
        }
        Ok(leases)
    }
}

fn decode(kv: &KeyValue) -> Result<Lease> {
    let mut lease: Lease = serde_json::from_slice(kv.value())?;
    lease.version = u64::try_from(kv.mod_revision()).unwrap_or_default();
    Ok(lease)
}

fn token_of(kv: &KeyValue) -> String {
    String::from_utf8_lossy(kv.value()).into_owned()
}

/// First key after every key that starts with `prefix`.
fn prefix_end(prefix: &str) -> Vec<u8> {
    let mut end = prefix.as_bytes().to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return end;
        }
    }
    vec![0]
}

fn revision_of(resp: &etcd_client::TxnResponse) -> u64 {
    resp.header()
        .map(|h| u64::try_from(h.revision()).unwrap_or_default())
        .unwrap_or_default()
}

#[async_trait]
impl LeaseStore for EtcdStore {
    async fn insert(&self, lease: &Lease) -> Result<Lease> {
        if !lease.state.holds_path() {
            return Err(Error::BadRequest(format!(
                "cannot insert a lease in state {}",
                lease.state
            )));
        }
        let path = LeasePath::parse(&lease.path)?;
        let lease_key = self.lease_key(&lease.token);
        let own_key = self.path_key(&lease.repository, &path.index_key());

        let mut guard: Vec<Compare> = path
            .ancestor_keys()
            .iter()
            .map(|ancestor| {
                Compare::version(
                    self.path_key(&lease.repository, ancestor),
                    CompareOp::Equal,
                    0,
                )
            })
            .collect();
        guard.push(
            Compare::version(own_key.as_str(), CompareOp::Equal, 0)
                .with_range(prefix_end(&own_key)),
        );
        guard.push(Compare::version(lease_key.as_str(), CompareOp::Equal, 0));

        let txn = Txn::new().when(guard).and_then(vec![
            TxnOp::put(lease_key.as_str(), serde_json::to_vec(lease)?, None),
            TxnOp::put(own_key.as_str(), lease.token.as_str(), None),
        ]);

        let mut kv = self.kv.clone();
        let resp = self.bounded("txn", kv.txn(txn)).await?;

        if resp.succeeded() {
            let mut stored = lease.clone();
            stored.version = revision_of(&resp);
            return Ok(stored);
        }

        if self.fetch(&lease.token).await?.is_some() {
            return Err(Error::VersionConflict(lease.token.clone()));
        }
        match self.overlapping(&lease.repository, &path).await?.first() {
            Some(blocking) => Err(Error::PathConflict(blocking.conflict_info())),
            // The blocker was released between the failed guard and the re-read.
            None => Err(Error::VersionConflict(lease.token.clone())),
        }
    }

    async fn get(&self, token: &str) -> Result<Lease> {
        self.fetch(token)
            .await?
            .ok_or_else(|| Error::NotFound(format!("lease {token}")))
    }

    async fn get_by_path(&self, repository: &str, path: &LeasePath) -> Result<Vec<Lease>> {
        self.overlapping(repository, path).await
    }

    async fn list(&self, repository: Option<&str>) -> Result<Vec<Lease>> {
        Ok(self
            .fetch_all()
            .await?
            .into_iter()
            .filter(|lease| lease.state.holds_path())
            .filter(|lease| repository.is_none_or(|repo| lease.repository == repo))
            .collect())
    }

    async fn update(&self, lease: &Lease) -> Result<Lease> {
        let current = self.get(&lease.token).await?;
        check_transition(&current, lease)?;

        let lease_key = self.lease_key(&lease.token);
        let version = i64::try_from(lease.version)
            .map_err(|_| Error::VersionConflict(lease.token.clone()))?;

        let mut ops = vec![TxnOp::put(
            lease_key.as_str(),
            serde_json::to_vec(lease)?,
            None,
        )];
        if !lease.state.holds_path() {
            let path = LeasePath::parse(&lease.path)?;
            ops.push(TxnOp::delete(
                self.path_key(&lease.repository, &path.index_key()),
                None,
            ));
        }

        let txn = Txn::new()
            .when(vec![Compare::mod_revision(
                lease_key.as_str(),
                CompareOp::Equal,
                version,
            )])
            .and_then(ops);

        let mut kv = self.kv.clone();
        let resp = self.bounded("txn", kv.txn(txn)).await?;
        if !resp.succeeded() {
            return match self.fetch(&lease.token).await? {
                Some(_) => Err(Error::VersionConflict(lease.token.clone())),
                None => Err(Error::NotFound(format!("lease {}", lease.token))),
            };
        }

        let mut stored = lease.clone();
        stored.version = revision_of(&resp);
        Ok(stored)
    }

    async fn remove(&self, token: &str) -> Result<()> {
        let Some(lease) = self.fetch(token).await? else {
            return Ok(());
        };
        let lease_key = self.lease_key(token);
        let path_key = self.path_key(
            &lease.repository,
            &LeasePath::parse(&lease.path)?.index_key(),
        );

        let txn = Txn::new()
            .when(vec![Compare::value(path_key.as_str(), CompareOp::Equal, token)])
            .and_then(vec![
                TxnOp::delete(lease_key.as_str(), None),
                TxnOp::delete(path_key.as_str(), None),
            ])
            .or_else(vec![TxnOp::delete(lease_key.as_str(), None)]);

        let mut kv = self.kv.clone();
        self.bounded("txn", kv.txn(txn)).await?;
        Ok(())
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Lease>> {
        Ok(self
            .fetch_all()
            .await?
            .into_iter()
            .filter(|lease| lease.is_expired(now))
            .collect())
    }

    async fn close(&self) -> Result<()> {
        tracing::debug!(prefix = %self.prefix, "Closing etcd lease store");
        Ok(())
    }
}
