//! Named store of private secrets and public key hashes.

use crate::config::KeyRecord;
use crate::error::{Result, TickerError};
use crate::types::KeyHash;
use std::collections::HashMap;
use std::fmt;

/// Key material held for a single name.
#[derive(Clone, PartialEq, Eq)]
pub enum KeyMaterial {
    /// We hold the raw secret; the public hash is derived from it.
    Private { secret: Vec<u8>, hash: KeyHash },
    /// We only know the public hash.
    Public { hash: KeyHash },
}

/// A named key.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyEntry {
    name: String,
    material: KeyMaterial,
}

impl KeyEntry {
    /// Create a private key from its raw secret.
    pub fn private(name: impl Into<String>, secret: Vec<u8>) -> Self {
        let hash = KeyHash::from_secret(&secret);
        Self {
            name: name.into(),
            material: KeyMaterial::Private { secret, hash },
        }
    }

    /// Create a public key from an already-computed hash.
    pub fn public(name: impl Into<String>, hash: KeyHash) -> Self {
        Self {
            name: name.into(),
            material: KeyMaterial::Public { hash },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_private(&self) -> bool {
        matches!(self.material, KeyMaterial::Private { .. })
    }

    pub fn material(&self) -> &KeyMaterial {
        &self.material
    }

    /// The public hash, stored or derived.
    pub fn public_hash(&self) -> &KeyHash {
        match &self.material {
            KeyMaterial::Private { hash, .. } | KeyMaterial::Public { hash } => hash,
        }
    }

    /// The raw secret, for private keys only.
    pub fn secret(&self) -> Option<&[u8]> {
        match &self.material {
            KeyMaterial::Private { secret, .. } => Some(secret),
            KeyMaterial::Public { .. } => None,
        }
    }

    /// The bytes the key was added with: the secret for a private key,
    /// the hash for a public one.
    pub fn data(&self) -> &[u8] {
        match &self.material {
            KeyMaterial::Private { secret, .. } => secret,
            KeyMaterial::Public { hash } => hash.as_bytes(),
        }
    }
}

impl fmt::Debug for KeyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print the secret.
        f.debug_struct("KeyEntry")
            .field("name", &self.name)
            .field("private", &self.is_private())
            .field("hash", self.public_hash())
            .finish()
    }
}

/// Keys indexed by name.
#[derive(Clone, Debug, Default)]
pub struct KeyTable {
    entries: HashMap<String, KeyEntry>,
}

impl KeyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from parsed key records. Duplicate names are an error.
    pub fn from_records(records: impl IntoIterator<Item = KeyRecord>) -> Result<Self> {
        let mut table = Self::new();
        for record in records {
            table.add(record.name, record.data, record.is_private)?;
        }
        Ok(table)
    }

    /// Add a key. `data` is the raw secret when `is_private`, otherwise the
    /// public hash.
    pub fn add(&mut self, name: impl Into<String>, data: Vec<u8>, is_private: bool) -> Result<()> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(TickerError::KeyExists(name));
        }

        let entry = if is_private {
            KeyEntry::private(name.clone(), data)
        } else {
            KeyEntry::public(name.clone(), KeyHash(data))
        };
        self.entries.insert(name, entry);
        Ok(())
    }

    /// Remove a key by name, returning it.
    pub fn remove(&mut self, name: &str) -> Result<KeyEntry> {
        self.entries
            .remove(name)
            .ok_or_else(|| TickerError::KeyNotFound(name.to_string()))
    }

    pub fn lookup(&self, name: &str) -> Option<&KeyEntry> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Key names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
