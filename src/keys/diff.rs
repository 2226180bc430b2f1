//! Minimal key changes between two named-key snapshots.
//!
//! Both snapshots are resolved against their tables, sorted by public hash
//! and deduplicated, then walked with two cursors. A hash that appears on
//! both sides with a different private/public role is emitted as a removal
//! of the old role's tuples plus an addition of the new role's.

use super::table::{KeyEntry, KeyMaterial, KeyTable};
use crate::types::KeyHash;
use std::cmp::Ordering;
use std::collections::btree_set;
use std::collections::BTreeSet;
use tracing::warn;

/// Which side of a key scheme a tuple belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyRole {
    /// Producer scheme: the notifier proves authorship with the secret.
    Producer,
    /// Consumer scheme: only holders of the secret may receive.
    Consumer,
}

/// Hash algorithm the broker applies to raw secrets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyScheme {
    Sha256,
}

/// Key material handed to the broker.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyData {
    Secret(Vec<u8>),
    Hash(KeyHash),
}

/// One (scheme, role, material) entry in a broker key block.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyTuple {
    pub scheme: KeyScheme,
    pub role: KeyRole,
    pub data: KeyData,
}

/// What the key set will be attached to. The two uses hand out secrets
/// and hashes on opposite sides of each scheme.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyUsage {
    Notification,
    Subscription,
}

/// An unordered collection of key tuples.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeySet(BTreeSet<KeyTuple>);

impl KeySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tuple: KeyTuple) -> bool {
        self.0.insert(tuple)
    }

    pub fn remove(&mut self, tuple: &KeyTuple) -> bool {
        self.0.remove(tuple)
    }

    pub fn contains(&self, tuple: &KeyTuple) -> bool {
        self.0.contains(tuple)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_set::Iter<'_, KeyTuple> {
        self.0.iter()
    }

    /// Apply a delta the way the broker does: removals first, then additions.
    pub fn apply(&mut self, delta: &KeyDelta) {
        for tuple in delta.to_remove.iter() {
            self.0.remove(tuple);
        }
        for tuple in delta.to_add.iter() {
            self.0.insert(tuple.clone());
        }
    }

    fn extend_from_entry(&mut self, entry: &KeyEntry, usage: KeyUsage) {
        for tuple in tuples_for(entry, usage) {
            self.0.insert(tuple);
        }
    }
}

impl<'a> IntoIterator for &'a KeySet {
    type Item = &'a KeyTuple;
    type IntoIter = btree_set::Iter<'a, KeyTuple>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Key changes needed to move a broker-side key set between snapshots.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyDelta {
    pub to_add: KeySet,
    pub to_remove: KeySet,
}

impl KeyDelta {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// A key table paired with the names selected from it.
#[derive(Clone, Copy, Debug)]
pub struct KeySnapshot<'a> {
    pub table: &'a KeyTable,
    pub names: &'a [String],
}

impl<'a> KeySnapshot<'a> {
    pub fn new(table: &'a KeyTable, names: &'a [String]) -> Self {
        Self { table, names }
    }
}

/// Compute the delta from `old` to `new` for the given usage.
pub fn diff(old: KeySnapshot<'_>, new: KeySnapshot<'_>, usage: KeyUsage) -> KeyDelta {
    let old = resolve(old);
    let new = resolve(new);

    let mut delta = KeyDelta::default();
    let (mut i, mut j) = (0, 0);

    while i < old.len() && j < new.len() {
        let (o, n) = (old[i], new[j]);
        match o.public_hash().cmp(n.public_hash()) {
            Ordering::Less => {
                delta.to_remove.extend_from_entry(o, usage);
                i += 1;
            }
            Ordering::Greater => {
                delta.to_add.extend_from_entry(n, usage);
                j += 1;
            }
            Ordering::Equal => {
                if o.is_private() != n.is_private() {
                    delta.to_remove.extend_from_entry(o, usage);
                    delta.to_add.extend_from_entry(n, usage);
                }
                i += 1;
                j += 1;
            }
        }
    }

    for o in &old[i..] {
        delta.to_remove.extend_from_entry(o, usage);
    }
    for n in &new[j..] {
        delta.to_add.extend_from_entry(n, usage);
    }

    delta
}

/// The full key set for a snapshot, i.e. its diff against nothing.
pub fn key_set(table: &KeyTable, names: &[String], usage: KeyUsage) -> KeySet {
    diff(
        KeySnapshot::new(table, &[]),
        KeySnapshot::new(table, names),
        usage,
    )
    .to_add
}

/// Look names up, sort by hash and drop duplicate hashes, keeping the
/// private entry when both roles are present.
fn resolve<'a>(snapshot: KeySnapshot<'a>) -> Vec<&'a KeyEntry> {
    let mut entries: Vec<&KeyEntry> = snapshot
        .names
        .iter()
        .filter_map(|name| {
            let entry = snapshot.table.lookup(name);
            if entry.is_none() {
                warn!(key = %name, "unknown key name, ignoring");
            }
            entry
        })
        .collect();

    // Private sorts ahead of public for the same hash so dedup keeps it.
    entries.sort_by(|a, b| {
        a.public_hash()
            .cmp(b.public_hash())
            .then_with(|| b.is_private().cmp(&a.is_private()))
    });
    entries.dedup_by(|later, earlier| later.public_hash() == earlier.public_hash());
    entries
}

fn tuples_for(entry: &KeyEntry, usage: KeyUsage) -> Vec<KeyTuple> {
    let tuple = |role, data| KeyTuple {
        scheme: KeyScheme::Sha256,
        role,
        data,
    };

    match (entry.material(), usage) {
        (KeyMaterial::Private { secret, hash }, KeyUsage::Notification) => vec![
            tuple(KeyRole::Producer, KeyData::Secret(secret.clone())),
            tuple(KeyRole::Consumer, KeyData::Hash(hash.clone())),
        ],
        (KeyMaterial::Private { secret, hash }, KeyUsage::Subscription) => vec![
            tuple(KeyRole::Producer, KeyData::Hash(hash.clone())),
            tuple(KeyRole::Consumer, KeyData::Secret(secret.clone())),
        ],
        (KeyMaterial::Public { hash }, KeyUsage::Notification) => {
            vec![tuple(KeyRole::Consumer, KeyData::Hash(hash.clone()))]
        }
        (KeyMaterial::Public { hash }, KeyUsage::Subscription) => {
            vec![tuple(KeyRole::Producer, KeyData::Hash(hash.clone()))]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn hashed(role: KeyRole, hash: &KeyHash) -> KeyTuple {
        KeyTuple {
            scheme: KeyScheme::Sha256,
            role,
            data: KeyData::Hash(hash.clone()),
        }
    }

    fn secret(role: KeyRole, bytes: &[u8]) -> KeyTuple {
        KeyTuple {
            scheme: KeyScheme::Sha256,
            role,
            data: KeyData::Secret(bytes.to_vec()),
        }
    }

    fn alice_bob() -> KeyTable {
        let mut table = KeyTable::new();
        table.add("alice", vec![0x01; 16], true).unwrap();
        table
            .add("bob", KeyHash::from_secret(b"bob").0, false)
            .unwrap();
        table
    }

    #[test]
    fn test_adding_public_key() {
        let table = alice_bob();
        let old = names(&["alice"]);
        let new = names(&["alice", "bob"]);

        let delta = diff(
            KeySnapshot::new(&table, &old),
            KeySnapshot::new(&table, &new),
            KeyUsage::Subscription,
        );

        let bob = KeyHash::from_secret(b"bob");
        assert!(delta.to_remove.is_empty());
        assert_eq!(delta.to_add.len(), 1);
        assert!(delta.to_add.contains(&hashed(KeyRole::Producer, &bob)));
    }

    #[test]
    fn test_demotion_removes_private_and_adds_public() {
        let mut old_table = KeyTable::new();
        old_table.add("alice", vec![0x01; 16], true).unwrap();
        let alice_hash = KeyHash::from_secret(&[0x01; 16]);

        let mut new_table = KeyTable::new();
        new_table.add("alice", alice_hash.0.clone(), false).unwrap();

        let list = names(&["alice"]);
        let delta = diff(
            KeySnapshot::new(&old_table, &list),
            KeySnapshot::new(&new_table, &list),
            KeyUsage::Notification,
        );

        assert_eq!(delta.to_remove.len(), 2);
        assert!(delta
            .to_remove
            .contains(&secret(KeyRole::Producer, &[0x01; 16])));
        assert!(delta
            .to_remove
            .contains(&hashed(KeyRole::Consumer, &alice_hash)));
        assert_eq!(delta.to_add.len(), 1);
        assert!(delta.to_add.contains(&hashed(KeyRole::Consumer, &alice_hash)));

        // Promotion is the mirror image.
        let back = diff(
            KeySnapshot::new(&new_table, &list),
            KeySnapshot::new(&old_table, &list),
            KeyUsage::Notification,
        );
        assert_eq!(back.to_add, delta.to_remove);
        assert_eq!(back.to_remove, delta.to_add);
    }

    #[test]
    fn test_duplicate_hash_prefers_private() {
        let mut table = KeyTable::new();
        table.add("alice", b"secret".to_vec(), true).unwrap();
        table
            .add("alice-pub", KeyHash::from_secret(b"secret").0, false)
            .unwrap();

        let set = key_set(&table, &names(&["alice-pub", "alice"]), KeyUsage::Subscription);
        assert_eq!(set.len(), 2);
        assert!(set.contains(&secret(KeyRole::Consumer, b"secret")));

        // Listing the same name twice is not a change.
        let once = names(&["alice"]);
        let twice = names(&["alice", "alice"]);
        let delta = diff(
            KeySnapshot::new(&table, &once),
            KeySnapshot::new(&table, &twice),
            KeyUsage::Subscription,
        );
        assert!(delta.is_empty());
    }

    #[test]
    fn test_unknown_names_are_skipped() {
        let table = alice_bob();
        let set = key_set(&table, &names(&["carol", "bob"]), KeyUsage::Notification);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_usage_inverts_roles() {
        let table = alice_bob();
        let list = names(&["alice"]);
        let for_notify = key_set(&table, &list, KeyUsage::Notification);
        let for_sub = key_set(&table, &list, KeyUsage::Subscription);

        assert!(for_notify.contains(&secret(KeyRole::Producer, &[0x01; 16])));
        assert!(for_sub.contains(&secret(KeyRole::Consumer, &[0x01; 16])));
    }

    const POOL: [&str; 6] = ["a", "b", "c", "a-pub", "d-pub", "missing"];

    fn pool_table() -> KeyTable {
        let mut table = KeyTable::new();
        table.add("a", b"alpha".to_vec(), true).unwrap();
        table.add("b", b"bravo".to_vec(), true).unwrap();
        table.add("c", vec![0xcc; 20], false).unwrap();
        table
            .add("a-pub", KeyHash::from_secret(b"alpha").0, false)
            .unwrap();
        table.add("d-pub", vec![0xdd; 32], false).unwrap();
        table
    }

    fn name_list() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec(prop::sample::select(POOL.to_vec()), 0..8)
            .prop_map(|v| v.into_iter().map(String::from).collect())
    }

    fn usage() -> impl Strategy<Value = KeyUsage> {
        prop_oneof![Just(KeyUsage::Notification), Just(KeyUsage::Subscription)]
    }

    proptest! {
        #[test]
        fn prop_delta_transforms_old_into_new(old in name_list(), new in name_list(), usage in usage()) {
            let table = pool_table();
            let delta = diff(
                KeySnapshot::new(&table, &old),
                KeySnapshot::new(&table, &new),
                usage,
            );

            let mut applied = key_set(&table, &old, usage);
            applied.apply(&delta);
            prop_assert_eq!(applied, key_set(&table, &new, usage));
        }

        #[test]
        fn prop_self_diff_is_empty(list in name_list(), usage in usage()) {
            let table = pool_table();
            let delta = diff(
                KeySnapshot::new(&table, &list),
                KeySnapshot::new(&table, &list),
                usage,
            );
            prop_assert!(delta.is_empty());
        }
    }
}
