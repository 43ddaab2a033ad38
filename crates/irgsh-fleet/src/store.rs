//! Key/set store backing the fleet registry.
//!
//! The registry needs TTL'd values, unexpiring sets, and a way to apply
//! several writes atomically. Redis provides all three; the in-memory
//! backend mirrors its semantics for tests and single-process setups.

pub mod memory;
pub mod redis_store;

pub use memory::MemoryFleetStore;
pub use redis_store::RedisFleetStore;

use async_trait::async_trait;
use std::time::Duration;

use crate::FleetResult;

/// One write of a [`Batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Set {
        key: String,
        value: String,
        ttl: Duration,
    },
    Delete {
        key: String,
    },
    SetAdd {
        key: String,
        member: String,
    },
    SetRemove {
        key: String,
        member: String,
    },
}

/// Precondition of a [`Batch`]: `key` must hold `expected`, or be absent
/// when `expected` is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guard {
    pub key: String,
    pub expected: Option<String>,
}

impl Guard {
    pub fn holds(&self, current: Option<&str>) -> bool {
        self.expected.as_deref() == current
    }
}

/// Writes applied all-or-nothing by [`FleetStore::apply`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    guards: Vec<Guard>,
    ops: Vec<BatchOp>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(&mut self, key: impl Into<String>, expected: Option<String>) -> &mut Self {
        self.guards.push(Guard {
            key: key.into(),
            expected,
        });
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>, ttl: Duration) -> &mut Self {
        self.ops.push(BatchOp::Set {
            key: key.into(),
            value: value.into(),
            ttl,
        });
        self
    }

    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(BatchOp::Delete { key: key.into() });
        self
    }

    pub fn set_add(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.ops.push(BatchOp::SetAdd {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn set_remove(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.ops.push(BatchOp::SetRemove {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn guards(&self) -> &[Guard] {
        &self.guards
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }
}

#[async_trait]
pub trait FleetStore: Send + Sync {
    /// Value under `key`, `None` if absent or expired.
    async fn get(&self, key: &str) -> FleetResult<Option<String>>;

    /// Members of the set under `key`; empty if the set does not exist.
    async fn members(&self, key: &str) -> FleetResult<Vec<String>>;

    /// Apply every write of `batch` atomically, provided every guard of
    /// the batch holds at that moment.
    ///
    /// Returns `false`, having written nothing, when a guard failed.
    async fn apply(&self, batch: Batch) -> FleetResult<bool>;

    /// Number of live keys starting with `prefix`.
    async fn count_keys(&self, prefix: &str) -> FleetResult<usize>;
}
