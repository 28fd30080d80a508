// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Run-scoped caches.
//!
//! Every cache is created empty when a run begins and dropped with the run.
//! Handle, type and level caches fill up while elements are visited and
//! duplicated; the containment resolver only reads them. The containment
//! cache is filled by the resolver alone.

pub mod containment;
pub mod handles;
pub mod levels;
pub mod types;

pub use containment::{ContainerEntry, ContainmentCache, RelationKind};
pub use handles::{ContainmentRole, HandleCache, ProductRecord};
pub use levels::{LevelInfo, LevelTable};
pub use types::{LookupState, TypeCache, TypeLookup, TypeRecord, TypeSignature};
