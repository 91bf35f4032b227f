//! stevedore-lib: core logic for the stevedore reconciler.
//!
//! stevedore watches a git repository carrying a container-composition
//! manifest and drives a local container engine toward the state the
//! manifest declares. This crate provides:
//! - config: daemon configuration loaded from YAML and the environment
//! - compose: the in-memory composition model, parsing and validation
//! - order: dependency resolution over service `depends_on` edges
//! - engine: the abstract `EngineClient` capability plus the Docker
//!   implementation and an in-memory fake for tests
//! - repo: clone/fetch/checkout of the deployment repository
//! - reconcile: volume, network and service convergence for one cycle
//! - daemon: the periodic reconciliation loop
//!
//! The `stevedore-cli` crate wires these together into the `stevedore`
//! binary.

pub mod compose;
pub mod config;
pub mod daemon;
pub mod engine;
pub mod order;
pub mod reconcile;
pub mod repo;
