// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Key types shared by the caches.
//!
//! Target entities are addressed by [`Handle`], a generational slot map key
//! handed out by the document builder. Handles are `Copy`; any number of caches
//! may hold the same handle, and a handle whose entity was removed simply stops
//! resolving (generational indices never alias a newer entity).
//!
//! Source elements are addressed by [`ElementId`], the source model's own
//! numeric identity. It is only meaningful within one source model.

use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Reference to an entity in the target document.
    pub struct Handle;
}

/// Identity of an element in the source model.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ElementId(pub u64);

impl ElementId {
    /// Returns the raw numeric id.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for ElementId {
    fn from(id: u64) -> Self {
        ElementId(id)
    }
}

impl std::fmt::Display for ElementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn element_id_display() {
        assert_eq!(ElementId(42).to_string(), "#42");
        assert_eq!(ElementId::from(7).get(), 7);
    }

    #[test]
    fn element_ids_order_numerically() {
        let mut ids = vec![ElementId(30), ElementId(2), ElementId(11)];
        ids.sort();
        assert_eq!(ids, vec![ElementId(2), ElementId(11), ElementId(30)]);
    }

    #[test]
    fn stale_handle_does_not_resolve() {
        let mut map: SlotMap<Handle, u32> = SlotMap::with_key();
        let h = map.insert(1);
        map.remove(h);
        let fresh = map.insert(2);

        assert!(map.get(h).is_none());
        assert_ne!(h, fresh);
    }
}
