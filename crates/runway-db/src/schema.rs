//! redb table definitions and bucket key layout.
//!
//! Every namespace is a table with `&[u8]` keys. A bucket is a contiguous
//! key range inside one table: a fixed prefix identifying the bucket
//! followed by an 8-byte big-endian sequence number, so byte order within a
//! bucket equals numeric order.
//!
//! | bucket                | table     | key                                  | value        |
//! |-----------------------|-----------|--------------------------------------|--------------|
//! | `Builds`              | `build`   | `seq(id)`                            | JSON `Build` |
//! | `Pending`             | `pending` | `seq(id)`                            | empty        |
//! | `Sha(sha)`            | `sha`     | `len32(sha) sha seq(n)`              | `seq(id)`    |
//! | `Ref(type, ref)`      | `ref`     | `type len32(ref) ref seq(n)`         | `seq(id)`    |
//! | `Output(id)`          | `output`  | `seq(id) seq(line)`                  | JSON line    |
//!
//! Sequence counters live in their own table keyed by namespace tag and
//! bucket prefix.

use redb::TableDefinition;
use runway_core::{BuildId, BuildType};

use crate::{DbError, DbResult};

pub(crate) type RawTable = TableDefinition<'static, &'static [u8], &'static [u8]>;

/// Primary build records keyed by `seq(id)`.
const BUILDS: RawTable = TableDefinition::new("build");

/// Markers for builds that are queued or running.
const PENDING: RawTable = TableDefinition::new("pending");

/// Commit SHA history.
const SHA_INDEX: RawTable = TableDefinition::new("sha");

/// Per build type and ref history.
const REF_INDEX: RawTable = TableDefinition::new("ref");

/// Output lines keyed by build and line number.
const OUTPUT: RawTable = TableDefinition::new("output");

/// Per-bucket sequence counters.
pub(crate) const SEQUENCES: TableDefinition<&[u8], u64> = TableDefinition::new("sequence");

/// Fixed-width encoding of a sequence value.
pub fn seq_key(seq: u64) -> [u8; 8] {
    seq.to_be_bytes()
}

/// Decode an 8-byte big-endian sequence value.
pub fn key_seq(bytes: &[u8]) -> DbResult<u64> {
    let raw: [u8; 8] = bytes.try_into().map_err(|_| {
        DbError::Corrupt(format!("expected 8-byte sequence, got {} bytes", bytes.len()))
    })?;
    Ok(u64::from_be_bytes(raw))
}

/// A top-level namespace (one redb table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Build,
    Pending,
    Sha,
    Ref,
    Output,
}

impl Namespace {
    pub(crate) fn definition(self) -> RawTable {
        match self {
            Namespace::Build => BUILDS,
            Namespace::Pending => PENDING,
            Namespace::Sha => SHA_INDEX,
            Namespace::Ref => REF_INDEX,
            Namespace::Output => OUTPUT,
        }
    }

    fn tag(self) -> u8 {
        match self {
            Namespace::Build => 1,
            Namespace::Pending => 2,
            Namespace::Sha => 3,
            Namespace::Ref => 4,
            Namespace::Output => 5,
        }
    }
}

/// A typed sub-collection of sequence-keyed entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket<'a> {
    Builds,
    Pending,
    Sha(&'a str),
    Ref(BuildType, &'a str),
    Output(BuildId),
}

impl Bucket<'_> {
    pub fn namespace(&self) -> Namespace {
        match self {
            Bucket::Builds => Namespace::Build,
            Bucket::Pending => Namespace::Pending,
            Bucket::Sha(_) => Namespace::Sha,
            Bucket::Ref(..) => Namespace::Ref,
            Bucket::Output(_) => Namespace::Output,
        }
    }

    /// Key prefix shared by every entry of this bucket.
    pub fn prefix(&self) -> Vec<u8> {
        match self {
            Bucket::Builds | Bucket::Pending => Vec::new(),
            Bucket::Sha(sha) => length_prefixed(&[], sha),
            Bucket::Ref(build_type, name) => length_prefixed(&[build_type.code()], name),
            Bucket::Output(id) => seq_key(id.get()).to_vec(),
        }
    }

    /// Full key of entry `seq`.
    pub fn key(&self, seq: u64) -> Vec<u8> {
        let mut key = self.prefix();
        key.extend_from_slice(&seq_key(seq));
        key
    }

    /// Smallest and largest possible keys in this bucket.
    pub(crate) fn key_bounds(&self) -> (Vec<u8>, Vec<u8>) {
        (self.key(0), self.key(u64::MAX))
    }

    /// Key of this bucket's counter in the sequence table.
    pub(crate) fn sequence_key(&self) -> Vec<u8> {
        let mut key = vec![self.namespace().tag()];
        key.extend_from_slice(&self.prefix());
        key
    }
}

fn length_prefixed(head: &[u8], name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(head.len() + 4 + name.len());
    out.extend_from_slice(head);
    out.extend_from_slice(&(name.len() as u32).to_be_bytes());
    out.extend_from_slice(name.as_bytes());
    out
}

/// Prefix of every ref bucket belonging to `build_type`.
pub(crate) fn ref_type_prefix(build_type: BuildType) -> Vec<u8> {
    vec![build_type.code()]
}

/// Recover the ref name from a raw ref-index key.
pub(crate) fn ref_name_from_key(key: &[u8]) -> DbResult<String> {
    let corrupt = || DbError::Corrupt(format!("malformed ref index key of {} bytes", key.len()));
    let len_bytes: [u8; 4] = key.get(1..5).ok_or_else(corrupt)?.try_into().map_err(|_| corrupt())?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    let name = key.get(5..5 + len).ok_or_else(corrupt)?;
    String::from_utf8(name.to_vec()).map_err(|_| corrupt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_key_order_matches_numeric_order() {
        let values = [0u64, 1, 255, 256, 65_535, 1 << 40, u64::MAX];
        for pair in values.windows(2) {
            assert!(seq_key(pair[0]) < seq_key(pair[1]));
        }
        assert_eq!(key_seq(&seq_key(1 << 40)).unwrap(), 1 << 40);
        assert!(key_seq(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_bucket_prefixes_do_not_collide() {
        // "ab" must not be a prefix-match for "abc" or vice versa.
        let short = Bucket::Sha("ab").prefix();
        let long = Bucket::Sha("abc").prefix();
        assert!(!long.starts_with(&short));

        let push = Bucket::Ref(BuildType::Push, "main").prefix();
        let pr = Bucket::Ref(BuildType::PullRequest, "main").prefix();
        assert_ne!(push, pr);
    }

    #[test]
    fn test_sequence_keys_are_namespaced() {
        assert_ne!(Bucket::Builds.sequence_key(), Bucket::Pending.sequence_key());
        assert_ne!(
            Bucket::Output(BuildId::new(1)).sequence_key(),
            Bucket::Output(BuildId::new(2)).sequence_key()
        );
    }

    #[test]
    fn test_ref_name_from_key() {
        let key = Bucket::Ref(BuildType::Push, "feature/x").key(3);
        assert_eq!(ref_name_from_key(&key).unwrap(), "feature/x");
        assert!(ref_name_from_key(&[0, 0, 0]).is_err());
    }
}
