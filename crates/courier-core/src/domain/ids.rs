//! Strongly-typed identifiers.
//!
//! Request and response ids are integers assigned monotonically by the
//! store (they map onto auto-increment primary keys in a relational
//! backend). The phantom parameter keeps the two id spaces apart at
//! compile time: a `ResponseId` can never be passed where a `RequestId`
//! is expected.
//!
//! Worker identities are different: workers live in separate processes
//! and must be able to mint an identity without any coordination, so
//! `WorkerId::generate` is backed by a ULID.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Marker trait for an id space. Provides the `Display` prefix.
pub trait IdSpace: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic integer id, tagged with its space.
///
/// Serializes as a bare integer so the persisted row layout stays a
/// plain numeric column.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<S: IdSpace> {
    value: u64,
    #[serde(skip)]
    _space: PhantomData<S>,
}

impl<S: IdSpace> Id<S> {
    pub const fn new(value: u64) -> Self {
        Self {
            value,
            _space: PhantomData,
        }
    }

    pub const fn value(self) -> u64 {
        self.value
    }
}

impl<S: IdSpace> fmt::Display for Id<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", S::prefix(), self.value)
    }
}

/// Marker for the request id space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Req {}

impl IdSpace for Req {
    fn prefix() -> &'static str {
        "req-"
    }
}

/// Marker for the response id space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resp {}

impl IdSpace for Resp {
    fn prefix() -> &'static str {
        "resp-"
    }
}

/// Identifier of a submitted request (primary key of the request table).
pub type RequestId = Id<Req>;

/// Identifier of a recorded response (primary key of the response table).
pub type ResponseId = Id<Resp>;

/// Identity of a worker process.
///
/// Opaque string; `generate` mints a ULID so independent worker
/// processes cannot collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
