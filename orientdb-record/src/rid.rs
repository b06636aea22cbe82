//! Record identifiers.
//!
//! A record id addresses one stored record as `#<cluster>:<position>`. The
//! type exists so that a link can be told apart from a string that merely
//! looks like one.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{RecordError, RecordResult};

static RID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#(-?\d+):(-?\d+)$").expect("valid record id pattern"));

/// Record identifier: `(cluster, position)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rid {
    pub cluster: i16,
    pub position: i64,
}

impl Rid {
    /// Cluster id the server hands out for records that only exist inside a
    /// transaction.
    pub const TEMPORARY_CLUSTER: i16 = -1;

    pub fn new(cluster: i16, position: i64) -> Self {
        Self { cluster, position }
    }

    /// A temporary id used to reference new records inside a commit.
    pub fn temporary(position: i64) -> Self {
        Self::new(Self::TEMPORARY_CLUSTER, position)
    }

    pub fn is_temporary(&self) -> bool {
        self.cluster < 0
    }

    /// Parse `#<cluster>:<position>`.
    pub fn parse(input: &str) -> RecordResult<Self> {
        let caps = RID_PATTERN
            .captures(input.trim())
            .ok_or_else(|| RecordError::InvalidRid(input.to_string()))?;
        Self::from_parts(&caps[1], &caps[2]).map_err(|_| RecordError::InvalidRid(input.to_string()))
    }

    /// Build a record id from its textual components. Both must coerce
    /// losslessly to integers of the wire width.
    pub fn from_parts(cluster: &str, position: &str) -> RecordResult<Self> {
        let cluster = cluster
            .trim()
            .parse::<i16>()
            .map_err(|_| RecordError::InvalidRid(format!("cluster '{}'", cluster)))?;
        let position = position
            .trim()
            .parse::<i64>()
            .map_err(|_| RecordError::InvalidRid(format!("position '{}'", position)))?;
        Ok(Self { cluster, position })
    }

    /// Whether `input` has the shape of a record id.
    pub fn is_valid(input: &str) -> bool {
        Self::parse(input).is_ok()
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}", self.cluster, self.position)
    }
}

impl FromStr for Rid {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Rid {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Rid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Rid::parse(&s).map_err(serde::de::Error::custom)
    }
}
