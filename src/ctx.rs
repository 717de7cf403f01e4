//! Deep-merging configuration tree used for subsystem `ctx` and the
//! `Builder::with_ctx` layering contract.

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A configuration value. Maps merge key-wise on [`CtxValue::merge`];
/// everything else — including lists — replaces wholesale, matching the
/// "nested objects merge, arrays replace" rule hook authors rely on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CtxValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Str(Cow<'static, str>),
    List(Vec<CtxValue>),
    Map(BTreeMap<Cow<'static, str>, CtxValue>),
}

impl Default for CtxValue {
    fn default() -> Self {
        CtxValue::Map(BTreeMap::new())
    }
}

impl CtxValue {
    pub fn map() -> Self {
        CtxValue::Map(BTreeMap::new())
    }

    pub fn as_map(&self) -> Option<&BTreeMap<Cow<'static, str>, CtxValue>> {
        match self {
            CtxValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CtxValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CtxValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CtxValue::I64(n) => Some(*n),
            _ => None,
        }
    }

    /// Look up a dotted path, e.g. `"config.scheduler.maxMessagesPerSlice"`.
    pub fn get_path(&self, path: &str) -> Option<&CtxValue> {
        let mut cur = self;
        for segment in path.split('.') {
            cur = cur.as_map()?.get(segment)?;
        }
        Some(cur)
    }

    pub fn set_path(&mut self, path: &str, value: CtxValue) {
        let mut segments = path.split('.').peekable();
        let mut cur = self;
        while let Some(segment) = segments.next() {
            let map = match cur {
                CtxValue::Map(m) => m,
                _ => {
                    *cur = CtxValue::map();
                    match cur {
                        CtxValue::Map(m) => m,
                        _ => unreachable!(),
                    }
                }
            };
            if segments.peek().is_none() {
                map.insert(Cow::Owned(segment.to_string()), value);
                return;
            }
            cur = map.entry(Cow::Owned(segment.to_string())).or_insert_with(CtxValue::map);
        }
    }

    /// Deep-merge `other` on top of `self`: maps merge key-wise recursively,
    /// every other variant (including lists) is replaced by `other`.
    pub fn merge(&self, other: &CtxValue) -> CtxValue {
        match (self, other) {
            (CtxValue::Map(base), CtxValue::Map(incoming)) => {
                let mut merged = base.clone();
                for (k, v) in incoming {
                    match merged.get(k) {
                        Some(existing) => {
                            let m = existing.merge(v);
                            merged.insert(k.clone(), m);
                        }
                        None => {
                            merged.insert(k.clone(), v.clone());
                        }
                    }
                }
                CtxValue::Map(merged)
            }
            (_, incoming) => incoming.clone(),
        }
    }

    /// Canonical byte serialization used for ctx hashing: `BTreeMap` already
    /// gives deterministic key order, so a plain JSON encoding is stable
    /// across calls.
    fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("CtxValue always serializes")
    }

    /// SHA-256 over the canonical serialization, used by the [`crate::builder::Builder`]
    /// to key its plan cache.
    pub fn hash(&self) -> CtxHash {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        CtxHash(bytes)
    }
}

/// Opaque, comparable, hashable digest of a resolved ctx tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CtxHash([u8; 32]);

impl fmt::Display for CtxHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

use std::fmt;
