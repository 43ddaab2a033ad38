//! Pipeline identifiers.

use chrono::{DateTime, Utc};
use derive_more::Display;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use uuid::Uuid;

use crate::{Error, Result};

/// Timestamp layout of the leading segment, sortable as text.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H%M%S";

/// Identifiers end up in filesystem paths and store keys, so only a
/// conservative alphabet is accepted.
static TASK_UUID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.+:~-]*$").expect("task uuid pattern is valid")
});

/// Identifier of one pipeline, shared by its "build" and "repo" signatures.
///
/// Minted ids have the shape
/// `<timestamp>_<random-uuid>_<maintainer-fingerprint>_<package-name>`.
/// ISO builds use a bare random uuid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[serde(try_from = "String", into = "String")]
#[display("{_0}")]
pub struct TaskUuid(String);

impl TaskUuid {
    /// Mint a new pipeline id for a maintainer's package.
    pub fn mint(fingerprint: &str, package_name: &str) -> Self {
        Self::mint_at(Utc::now(), fingerprint, package_name)
    }

    /// Mint a pipeline id stamped with the given submission time.
    pub fn mint_at(at: DateTime<Utc>, fingerprint: &str, package_name: &str) -> Self {
        Self(format!(
            "{}_{}_{}_{}",
            at.format(TIMESTAMP_FORMAT),
            Uuid::new_v4(),
            fingerprint,
            package_name
        ))
    }

    /// A bare random id, used for standalone tasks.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parse and validate an id received from outside.
    pub fn parse(value: &str) -> Result<Self> {
        if value.is_empty() {
            return Err(Error::Validation("pipeline id is empty".to_string()));
        }
        if value.contains("..") || !TASK_UUID_PATTERN.is_match(value) {
            return Err(Error::Validation(format!("malformed pipeline id: {}", value)));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Maintainer fingerprint segment, when the id was minted for a package.
    pub fn fingerprint(&self) -> Option<&str> {
        self.segments().map(|(_, _, fingerprint, _)| fingerprint)
    }

    /// Package name segment, when the id was minted for a package.
    pub fn package_name(&self) -> Option<&str> {
        self.segments().map(|(_, _, _, name)| name)
    }

    fn segments(&self) -> Option<(&str, &str, &str, &str)> {
        let mut parts = self.0.splitn(4, '_');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(ts), Some(random), Some(fingerprint), Some(name)) => {
                Some((ts, random, fingerprint, name))
            }
            _ => None,
        }
    }
}

impl TryFrom<String> for TaskUuid {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<TaskUuid> for String {
    fn from(id: TaskUuid) -> Self {
        id.0
    }
}

impl std::str::FromStr for TaskUuid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl AsRef<str> for TaskUuid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
