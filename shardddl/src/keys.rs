//! Layout of coordination keys.
//!
//! A key is `<root>/<adapter path>/` followed by hex encoded segments separated by `/`.
//! Encoding every segment keeps `/` out of user supplied names, so the prefix produced for a
//! task never matches another task whose name merely starts with the same characters.

use crate::bail;
use crate::error::{CoordResult, ErrorKind};

/// Describes one family of keys: its path below the root and how many segments identify an
/// entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyAdapter {
    path: &'static str,
    segments: usize,
}

/// Operations of the optimistic shard DDL protocol, keyed by task, source, upstream schema and
/// upstream table.
pub const SHARD_DDL_OPTIMISM_OPERATION: KeyAdapter = KeyAdapter {
    path: "shardddl-optimism/operation",
    segments: 4,
};

/// Full configuration of an upstream source, keyed by source id.
pub const UPSTREAM_CONFIG: KeyAdapter = KeyAdapter {
    path: "upstream/config",
    segments: 1,
};

/// Source a worker relays for, keyed by worker name.
pub const RELAY_CONFIG: KeyAdapter = KeyAdapter {
    path: "relay/config",
    segments: 1,
};

impl KeyAdapter {
    /// Returns the path of this family below the root.
    pub fn path(&self) -> &'static str {
        self.path
    }

    /// Returns the number of segments identifying one entry.
    pub fn segments(&self) -> usize {
        self.segments
    }

    /// Returns the prefix shared by every key of this family.
    pub fn root_prefix(&self, root: &str) -> String {
        format!("{}/{}/", root.trim_end_matches('/'), self.path)
    }

    /// Encodes `segments` into a key below `root`.
    ///
    /// Passing all segments yields the key of one entry. Passing fewer yields the prefix shared
    /// by every entry below them, ending with `/`. Passing more than the family has is an error.
    pub fn encode<S: AsRef<str>>(&self, root: &str, segments: &[S]) -> CoordResult<String> {
        if segments.len() > self.segments {
            bail!(
                ErrorKind::InvalidKey,
                "Too many key segments",
                format!(
                    "{} takes {} segments, got {}",
                    self.path,
                    self.segments,
                    segments.len()
                )
            );
        }

        let mut key = self.root_prefix(root);
        for (index, segment) in segments.iter().enumerate() {
            if index > 0 {
                key.push('/');
            }
            key.push_str(&hex::encode(segment.as_ref()));
        }

        if !segments.is_empty() && segments.len() < self.segments {
            key.push('/');
        }

        Ok(key)
    }

    /// Decodes the segments of a full entry key below `root`.
    pub fn decode(&self, root: &str, key: &str) -> CoordResult<Vec<String>> {
        let prefix = self.root_prefix(root);
        let Some(rest) = key.strip_prefix(prefix.as_str()) else {
            bail!(
                ErrorKind::InvalidKey,
                "Key does not belong to this key family",
                format!("key {key} does not start with {prefix}")
            );
        };

        let parts: Vec<&str> = rest.split('/').collect();
        if parts.len() != self.segments {
            bail!(
                ErrorKind::InvalidKey,
                "Unexpected number of key segments",
                format!(
                    "key {key} has {} segments, expected {}",
                    parts.len(),
                    self.segments
                )
            );
        }

        parts
            .into_iter()
            .map(|part| -> CoordResult<String> { Ok(String::from_utf8(hex::decode(part)?)?) })
            .collect()
    }
}

/// Generates the id shared by every operation of one downstream table lock.
pub fn gen_ddl_lock_id(task: &str, down_schema: &str, down_table: &str) -> String {
    format!("{task}-`{down_schema}`.`{down_table}`")
}
