//! Named keys and key-set diffs.
//!
//! A [`KeyTable`] maps names to private secrets or public hashes. The
//! [`diff`] function turns two `(table, names)` snapshots into the key
//! tuples the broker must add and remove, so that a subscription's key
//! block can follow reloads of either the key file or the group file
//! without being torn down.

mod diff;
mod table;

pub use diff::{
    diff, key_set, KeyData, KeyDelta, KeyRole, KeyScheme, KeySet, KeySnapshot, KeyTuple, KeyUsage,
};
pub use table::{KeyEntry, KeyMaterial, KeyTable};
