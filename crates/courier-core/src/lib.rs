//! courier-core
//!
//! An asynchronous request/response broker: producers submit
//! topic-addressed requests, workers claim and process them, outcomes
//! are recorded as correlated responses.
//!
//! The store is the only shared mutable resource. Workers, which may
//! be separate processes, coordinate exclusively through its atomic
//! conditional update, so the broker guarantees at most one concurrent
//! claim per request and at-least-once processing given retries; lease
//! expiry bounds the damage of a crashed worker.
//!
//! # Modules
//! - **domain**: ids, topics, the status state machine, request and
//!   response records, error taxonomy
//! - **store**: the `RequestStore`/`ResponseStore` ports and the
//!   in-memory implementation
//! - **claim**: claim/renew/release/finalize/reap, each one conditional
//!   update against the store
//! - **handler**: topic handlers and their registry
//! - **worker**: the poll→claim→execute→record→finalize loop
//! - **reaper**: background release of lapsed leases
//! - **builder**: wiring, with fail-fast topic coverage checks

pub mod backoff;
pub mod builder;
pub mod claim;
pub mod clock;
pub mod config;
pub mod domain;
pub mod handler;
pub mod observability;
pub mod reaper;
pub mod store;
pub mod worker;
