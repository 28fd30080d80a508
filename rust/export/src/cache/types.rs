// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Representation/type cache.
//!
//! Instances that share a [`TypeSignature`] and use shared type geometry map
//! to one [`TypeRecord`]; the geometry builder runs once per signature. A
//! record that came back empty may be rebuilt once, from whichever later
//! element hits it first. If that retry is empty too, the empty record stays
//! and is shared by everyone after.
//!
//! Elements with per-instance geometry never reach this cache.

use std::fmt::Write as _;

use rustc_hash::FxHashMap;

use crate::entity::EntityKind;
use crate::error::Result;
use crate::geometry::BuiltRepresentation;
use crate::keys::{ElementId, Handle};
use crate::source::{ContainerOverride, SourceElement};

/// Deduplication key for shared type geometry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeSignature {
    pub type_id: ElementId,
    pub level_override: Option<ElementId>,
    pub mirrored: bool,
    pub kind: EntityKind,
    pub predefined_type: Option<String>,
    pub material: Option<String>,
}

impl TypeSignature {
    /// Builds the signature for an element, or `None` if it declares no type.
    pub fn for_element(
        element: &SourceElement,
        kind: EntityKind,
        predefined_type: Option<&str>,
    ) -> Option<Self> {
        let level_override = match element.containment_override {
            Some(ContainerOverride::Level(id)) => Some(id),
            _ => None,
        };
        Some(Self {
            type_id: element.type_id?,
            level_override,
            mirrored: element.mirrored,
            kind,
            predefined_type: predefined_type.map(str::to_string),
            material: element.material.clone(),
        })
    }

    /// Canonical text form, used to seed the type object's identifier.
    pub fn key_string(&self) -> String {
        let mut key = format!("type{}|{}", self.type_id, self.kind);
        if let Some(level) = self.level_override {
            let _ = write!(key, "|level{level}");
        }
        if self.mirrored {
            key.push_str("|mirrored");
        }
        if let Some(predefined) = &self.predefined_type {
            let _ = write!(key, "|{predefined}");
        }
        if let Some(material) = &self.material {
            let _ = write!(key, "|mat:{material}");
        }
        key
    }
}

/// Cached shared definition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeRecord {
    /// Shape representations produced by the builder.
    pub representations: Vec<Handle>,
    /// Representation maps wrapping `representations` on the type object.
    pub representation_maps: Vec<Handle>,
    /// The type object, once created.
    pub type_handle: Option<Handle>,
    pub material: Option<String>,
    pub profile: Option<String>,
    pub is_empty: bool,
    retried: bool,
}

impl TypeRecord {
    fn from_built(built: BuiltRepresentation) -> Self {
        Self {
            is_empty: built.representations.is_empty(),
            representations: built.representations,
            representation_maps: Vec::new(),
            type_handle: None,
            material: built.material,
            profile: built.profile,
            retried: false,
        }
    }
}

/// How a lookup was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupState {
    /// First encounter; the builder ran.
    Created,
    /// Cached record was empty; the builder ran again and produced shapes.
    Rebuilt,
    /// Served from cache without running the builder.
    Cached,
}

/// Result of [`TypeCache::get_or_create`].
#[derive(Debug, Clone)]
pub struct TypeLookup {
    pub record: TypeRecord,
    pub state: LookupState,
}

/// Cache of shared type definitions for one run.
#[derive(Debug, Default)]
pub struct TypeCache {
    records: FxHashMap<TypeSignature, TypeRecord>,
    builds: usize,
    hits: usize,
}

impl TypeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, signature: &TypeSignature) -> Option<&TypeRecord> {
        self.records.get(signature)
    }

    /// Returns the record for `signature`, running `build` if it is absent or
    /// empty and not yet retried.
    pub fn get_or_create<F>(&mut self, signature: &TypeSignature, build: F) -> Result<TypeLookup>
    where
        F: FnOnce() -> Result<BuiltRepresentation>,
    {
        if let Some(record) = self.records.get_mut(signature) {
            if !record.is_empty || record.retried {
                self.hits += 1;
                return Ok(TypeLookup {
                    record: record.clone(),
                    state: LookupState::Cached,
                });
            }

            record.retried = true;
            let built = build()?;
            self.builds += 1;
            if built.is_empty() {
                tracing::debug!(signature = %signature.key_string(), "Type still empty after retry");
                return Ok(TypeLookup {
                    record: record.clone(),
                    state: LookupState::Cached,
                });
            }
            record.representations = built.representations;
            record.material = built.material.or(record.material.take());
            record.profile = built.profile.or(record.profile.take());
            record.is_empty = false;
            return Ok(TypeLookup {
                record: record.clone(),
                state: LookupState::Rebuilt,
            });
        }

        let built = build()?;
        self.builds += 1;
        let record = TypeRecord::from_built(built);
        self.records.insert(signature.clone(), record.clone());
        Ok(TypeLookup {
            record,
            state: LookupState::Created,
        })
    }

    /// Records the type object and its representation maps for a signature.
    pub fn attach_type(
        &mut self,
        signature: &TypeSignature,
        type_handle: Handle,
        representation_maps: Vec<Handle>,
    ) {
        if let Some(record) = self.records.get_mut(signature) {
            record.type_handle = Some(type_handle);
            record.representation_maps = representation_maps;
        }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of builder invocations made through the cache.
    pub fn build_count(&self) -> usize {
        self.builds
    }

    /// Number of lookups served without building.
    pub fn hit_count(&self) -> usize {
        self.hits
    }
}
