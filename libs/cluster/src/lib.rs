//! Cluster API types, client, and watch-fed local views.
//!
//! This crate is the scheduler's window onto the cluster:
//!
//! - [`types`]: the object model (pods, nodes, bindings, watch events)
//! - [`client`]: the [`ClusterApi`](client::ClusterApi) trait the scheduler
//!   core is written against
//! - [`rest`]: the HTTP transport (JSON requests, NDJSON watch streams)
//! - [`cache`]: eventually-consistent in-memory views fed by watch loops
//!   with initial-sync gating, reconnect backoff, and periodic relists
//! - [`fake`]: an in-memory cluster implementation for tests and local
//!   development
//!
//! Consumers read the views synchronously and receive immutable `Arc`
//! snapshots; the only writers are the watch loops.

pub mod cache;
pub mod client;
pub mod error;
pub mod fake;
pub mod rest;
pub mod store;
pub mod types;

pub use cache::ClusterCache;
pub use client::ClusterApi;
pub use error::ClusterError;
pub use rest::{Credentials, RestClient};
pub use store::ObjectStore;
pub use types::{Binding, Container, Node, NodeCondition, Pod, ResourceQuantity, WatchEvent};
