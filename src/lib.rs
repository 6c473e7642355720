//! # Leasegate
//!
//! A lease gateway that serializes concurrent writes to subtrees of versioned
//! content repositories. Writers acquire a time-bounded lease on a path, submit
//! their payload by committing the lease, and the gateway hands the payload to
//! a publisher. Two leases in one repository never coexist when one path is a
//! prefix of the other.
//!
//! Usable both as a standalone binary and as a library.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! leasegate = { version = "0.0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use leasegate::config::GatewayConfig;
//! use leasegate::lease::{LeaseEngine, NoopPublisher};
//! use leasegate::server::{AppState, create_router};
//! use leasegate::store::EmbeddedStore;
//!
//! let config = Arc::new(GatewayConfig::load("leasegate.toml")?);
//! let store = Arc::new(EmbeddedStore::open("./data/leases.db")?);
//! let engine = Arc::new(LeaseEngine::new(config.clone(), store, Arc::new(NoopPublisher)));
//! let router = create_router(Arc::new(AppState::new(config, engine)));
//! // Serve with axum...
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Includes the signed HTTP client. Disable with `default-features = false`.
//! - `etcd`: Adds the etcd v3 lease store for multi-instance deployments.

pub mod auth;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod lease;
pub mod server;
pub mod store;
pub mod types;
