use crate::store::base::KeyValue;

/// Field of a stored key that a [`Compare`] inspects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompareTarget {
    Value(String),
    CreateRevision(i64),
    ModRevision(i64),
    Version(i64),
}

/// Comparison operator of a [`Compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    Greater,
    Less,
}

/// A guard evaluated against the current state of one key before a transaction runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compare {
    pub key: String,
    pub target: CompareTarget,
    pub op: CompareOp,
}

impl Compare {
    pub fn value(key: impl Into<String>, op: CompareOp, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            target: CompareTarget::Value(value.into()),
            op,
        }
    }

    pub fn create_revision(key: impl Into<String>, op: CompareOp, revision: i64) -> Self {
        Self {
            key: key.into(),
            target: CompareTarget::CreateRevision(revision),
            op,
        }
    }

    pub fn mod_revision(key: impl Into<String>, op: CompareOp, revision: i64) -> Self {
        Self {
            key: key.into(),
            target: CompareTarget::ModRevision(revision),
            op,
        }
    }

    pub fn version(key: impl Into<String>, op: CompareOp, version: i64) -> Self {
        Self {
            key: key.into(),
            target: CompareTarget::Version(version),
            op,
        }
    }

    /// Evaluates the guard against the stored entry for its key.
    ///
    /// A missing key has create revision, mod revision and version `0`, and never matches a
    /// value comparison.
    pub fn evaluate(&self, kv: Option<&KeyValue>) -> bool {
        let ordering = match (&self.target, kv) {
            (CompareTarget::Value(_), None) => return false,
            (CompareTarget::Value(expected), Some(kv)) => kv.value.as_str().cmp(expected.as_str()),
            (CompareTarget::CreateRevision(expected), kv) => {
                kv.map_or(0, |kv| kv.create_revision).cmp(expected)
            }
            (CompareTarget::ModRevision(expected), kv) => {
                kv.map_or(0, |kv| kv.mod_revision).cmp(expected)
            }
            (CompareTarget::Version(expected), kv) => kv.map_or(0, |kv| kv.version).cmp(expected),
        };

        match self.op {
            CompareOp::Equal => ordering.is_eq(),
            CompareOp::NotEqual => ordering.is_ne(),
            CompareOp::Greater => ordering.is_gt(),
            CompareOp::Less => ordering.is_lt(),
        }
    }
}

/// A single request executed inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOp {
    Put { key: String, value: String },
    Get { key: String, prefix: bool },
    Delete { key: String, prefix: bool },
}

impl TxnOp {
    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        TxnOp::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn get(key: impl Into<String>) -> Self {
        TxnOp::Get {
            key: key.into(),
            prefix: false,
        }
    }

    pub fn get_prefix(prefix: impl Into<String>) -> Self {
        TxnOp::Get {
            key: prefix.into(),
            prefix: true,
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        TxnOp::Delete {
            key: key.into(),
            prefix: false,
        }
    }

    pub fn delete_prefix(prefix: impl Into<String>) -> Self {
        TxnOp::Delete {
            key: prefix.into(),
            prefix: true,
        }
    }

    /// Returns the key or prefix this request targets.
    pub fn key(&self) -> &str {
        match self {
            TxnOp::Put { key, .. } | TxnOp::Get { key, .. } | TxnOp::Delete { key, .. } => key,
        }
    }
}

/// Result of one [`TxnOp`], in the same position as the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOpResponse {
    Put,
    Get(Vec<KeyValue>),
    Delete { deleted: usize },
}

/// An atomic multi-key transaction.
///
/// If every compare holds, the `success` requests run, otherwise the `failure` requests run.
/// An empty compare list always succeeds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Txn {
    pub compares: Vec<Compare>,
    pub success: Vec<TxnOp>,
    pub failure: Vec<TxnOp>,
}

impl Txn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn when(mut self, compares: impl IntoIterator<Item = Compare>) -> Self {
        self.compares.extend(compares);
        self
    }

    pub fn and_then(mut self, ops: impl IntoIterator<Item = TxnOp>) -> Self {
        self.success.extend(ops);
        self
    }

    pub fn or_else(mut self, ops: impl IntoIterator<Item = TxnOp>) -> Self {
        self.failure.extend(ops);
        self
    }
}

/// Outcome of a [`Txn`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnResponse {
    /// Whether every compare held and the `success` branch ran.
    pub succeeded: bool,
    /// Store revision after the transaction was applied.
    pub revision: i64,
    pub responses: Vec<TxnOpResponse>,
}

impl TxnResponse {
    /// Returns the entries read by the `index`-th request, if it was a get.
    pub fn get_response(&self, index: usize) -> Option<&[KeyValue]> {
        match self.responses.get(index) {
            Some(TxnOpResponse::Get(kvs)) => Some(kvs),
            _ => None,
        }
    }
}
