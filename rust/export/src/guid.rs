// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Stable, content-derived identifiers.
//!
//! A [`StableId`] is a pure function of a source element's persistent identity,
//! a role string and an optional disambiguator. Re-exporting an unchanged model
//! therefore reproduces every identifier byte for byte. The composite string is
//! hashed with SHA-256 and the leading 128 bits are written in the 22-character
//! base-64 alphabet of the target schema's `GlobalId`.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The target schema's identifier alphabet.
const ALPHABET: &[u8; 64] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz_$";

/// Field separator inside the hashed composite string.
const SEPARATOR: u8 = 0x1f;

/// Length of an encoded identifier.
pub const STABLE_ID_LEN: usize = 22;

/// A deterministic 22-character identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StableId(String);

impl StableId {
    /// Derives the identifier for `(unique_id, role, disambiguator)`.
    pub fn derive(unique_id: &str, role: &str, disambiguator: Option<&str>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(unique_id.as_bytes());
        hasher.update([SEPARATOR]);
        hasher.update(role.as_bytes());
        if let Some(extra) = disambiguator {
            hasher.update([SEPARATOR]);
            hasher.update(extra.as_bytes());
        }
        let digest = hasher.finalize();

        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        StableId(encode(u128::from_be_bytes(bytes)))
    }

    /// Returns the encoded identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Encodes 128 bits as 2 + 21 × 6 bits.
fn encode(value: u128) -> String {
    let mut out = String::with_capacity(STABLE_ID_LEN);
    out.push(ALPHABET[((value >> 126) & 0x3) as usize] as char);
    for i in 1..STABLE_ID_LEN {
        let shift = 6 * (STABLE_ID_LEN - 1 - i);
        out.push(ALPHABET[((value >> shift) & 0x3f) as usize] as char);
    }
    out
}

/// Run-scoped identifier service.
///
/// Derivation itself is stateless; the service records what it has issued so
/// collisions are visible in logs.
#[derive(Debug, Default)]
pub struct GuidService {
    issued: FxHashMap<StableId, String>,
}

impl GuidService {
    /// Creates an empty service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the identifier for an element in a role.
    pub fn identifier_for(
        &mut self,
        unique_id: &str,
        role: &str,
        disambiguator: Option<&str>,
    ) -> StableId {
        let id = StableId::derive(unique_id, role, disambiguator);
        let composite = match disambiguator {
            Some(extra) => format!("{unique_id}/{role}/{extra}"),
            None => format!("{unique_id}/{role}"),
        };
        match self.issued.get(&id) {
            Some(previous) if *previous != composite => {
                tracing::debug!(id = %id, previous = %previous, current = %composite, "Identifier collision");
            }
            Some(_) => {}
            None => {
                self.issued.insert(id.clone(), composite);
            }
        }
        id
    }

    /// Returns the number of distinct identifiers issued.
    pub fn issued_count(&self) -> usize {
        self.issued.len()
    }
}
