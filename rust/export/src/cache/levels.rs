// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Level table.
//!
//! One [`LevelInfo`] per source level, kept in elevation order. Levels that do
//! not bear a building storey get no container of their own; they fold into
//! the nearest storey at or below them, or the lowest storey when none is
//! below. Elements still register against the level they were modelled on and
//! the folding is applied when containment is resolved.

use std::collections::BTreeSet;

use rustc_hash::FxHashMap;

use crate::keys::{ElementId, Handle};
use crate::source::SourceLevel;

/// Per-level export state.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelInfo {
    pub level_id: ElementId,
    pub name: String,
    pub elevation: f64,
    /// Distance to the next storey above; `None` for the topmost.
    pub height: Option<f64>,
    pub is_building_storey: bool,
    /// Building storey entity, for storey-bearing levels.
    pub container: Option<Handle>,
    pub placement: Option<Handle>,
    /// Storey level this level folds into, for non-storey levels.
    pub folded_into: Option<ElementId>,
    /// Spatial children (spaces), aggregated by the storey.
    pub related_products: BTreeSet<Handle>,
    /// Contained elements.
    pub related_elements: BTreeSet<Handle>,
}

/// All levels of one run.
#[derive(Debug, Default)]
pub struct LevelTable {
    levels: Vec<LevelInfo>,
    index: FxHashMap<ElementId, usize>,
}

impl LevelTable {
    /// Builds the table from source levels, computing spans and folding.
    pub fn from_source(source: &[SourceLevel]) -> Self {
        let mut sorted: Vec<&SourceLevel> = source.iter().collect();
        sorted.sort_by(|a, b| a.elevation.total_cmp(&b.elevation));

        let storeys: Vec<(ElementId, f64)> = sorted
            .iter()
            .filter(|l| l.is_building_storey)
            .map(|l| (l.id, l.elevation))
            .collect();

        let levels: Vec<LevelInfo> = sorted
            .iter()
            .map(|level| {
                let above = storeys
                    .iter()
                    .find(|(id, elev)| *elev > level.elevation && *id != level.id)
                    .map(|(_, elev)| elev - level.elevation);
                let folded_into = if level.is_building_storey {
                    None
                } else {
                    storeys
                        .iter()
                        .rev()
                        .find(|(_, elev)| *elev <= level.elevation)
                        .or_else(|| storeys.first())
                        .map(|(id, _)| *id)
                };
                LevelInfo {
                    level_id: level.id,
                    name: level.name.clone(),
                    elevation: level.elevation,
                    height: above,
                    is_building_storey: level.is_building_storey,
                    container: None,
                    placement: None,
                    folded_into,
                    related_products: BTreeSet::new(),
                    related_elements: BTreeSet::new(),
                }
            })
            .collect();

        let index = levels
            .iter()
            .enumerate()
            .map(|(i, l)| (l.level_id, i))
            .collect();
        Self { levels, index }
    }

    pub fn get(&self, id: ElementId) -> Option<&LevelInfo> {
        self.index.get(&id).map(|&i| &self.levels[i])
    }

    fn get_mut(&mut self, id: ElementId) -> Option<&mut LevelInfo> {
        let i = *self.index.get(&id)?;
        self.levels.get_mut(i)
    }

    pub fn contains(&self, id: ElementId) -> bool {
        self.index.contains_key(&id)
    }

    /// Levels in ascending elevation.
    pub fn iter(&self) -> impl Iterator<Item = &LevelInfo> {
        self.levels.iter()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn has_storeys(&self) -> bool {
        self.levels.iter().any(|l| l.is_building_storey)
    }

    /// Attaches the storey entity created for a level.
    pub fn set_container(&mut self, id: ElementId, container: Handle, placement: Handle) {
        if let Some(level) = self.get_mut(id) {
            level.container = Some(container);
            level.placement = Some(placement);
        }
    }

    /// Returns the storey a level resolves to: itself, or the storey it folds into.
    pub fn storey_for(&self, id: ElementId) -> Option<&LevelInfo> {
        let level = self.get(id)?;
        if level.container.is_some() {
            return Some(level);
        }
        let target = self.get(level.folded_into?)?;
        target.container.is_some().then_some(target)
    }

    /// Registers a contained element. Returns `false` for unknown levels.
    pub fn add_element(&mut self, id: ElementId, handle: Handle) -> bool {
        match self.get_mut(id) {
            Some(level) => {
                level.related_elements.insert(handle);
                true
            }
            None => false,
        }
    }

    /// Registers a spatial child. Returns `false` for unknown levels.
    pub fn add_product(&mut self, id: ElementId, handle: Handle) -> bool {
        match self.get_mut(id) {
            Some(level) => {
                level.related_products.insert(handle);
                true
            }
            None => false,
        }
    }

    /// Finds the level at an elevation.
    ///
    /// A level within `tolerance` wins, storeys before non-storeys. Otherwise
    /// the highest storey below the elevation is returned.
    pub fn level_at(&self, elevation: f64, tolerance: f64) -> Option<ElementId> {
        let exact = self
            .levels
            .iter()
            .filter(|l| (l.elevation - elevation).abs() <= tolerance)
            .min_by_key(|l| !l.is_building_storey);
        if let Some(level) = exact {
            return Some(level.level_id);
        }
        self.levels
            .iter()
            .rev()
            .find(|l| l.is_building_storey && l.elevation < elevation)
            .map(|l| l.level_id)
    }

    /// Union of the member sets of a storey and every level folded into it,
    /// as `(elements, products)`.
    pub fn folded_members(&self, storey: ElementId) -> (BTreeSet<Handle>, BTreeSet<Handle>) {
        let mut elements = BTreeSet::new();
        let mut products = BTreeSet::new();
        for level in self
            .levels
            .iter()
            .filter(|l| l.level_id == storey || l.folded_into == Some(storey))
        {
            elements.extend(level.related_elements.iter().copied());
            products.extend(level.related_products.iter().copied());
        }
        (elements, products)
    }

    /// Levels whose members have no storey to go to.
    pub fn unresolved(&self) -> impl Iterator<Item = &LevelInfo> {
        self.levels
            .iter()
            .filter(move |l| self.storey_for(l.level_id).is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use slotmap::SlotMap;

    fn handles(n: usize) -> Vec<Handle> {
        let mut map: SlotMap<Handle, ()> = SlotMap::with_key();
        (0..n).map(|_| map.insert(())).collect()
    }

    fn table() -> LevelTable {
        LevelTable::from_source(&[
            SourceLevel::storey(2, "L1", 10.0),
            SourceLevel::non_storey(3, "Mezzanine", 14.0),
            SourceLevel::storey(1, "L0", 0.0),
            SourceLevel::storey(4, "L2", 20.0),
            SourceLevel::non_storey(5, "Pit", -2.0),
        ])
    }

    #[test]
    fn sorted_by_elevation_with_spans() {
        let table = table();
        let order: Vec<u64> = table.iter().map(|l| l.level_id.get()).collect();
        assert_eq!(order, vec![5, 1, 2, 3, 4]);

        assert_relative_eq!(table.get(ElementId(1)).unwrap().height.unwrap(), 10.0);
        assert_relative_eq!(table.get(ElementId(3)).unwrap().height.unwrap(), 6.0);
        assert!(table.get(ElementId(4)).unwrap().height.is_none());
    }

    #[test]
    fn non_storeys_fold_down_or_to_lowest() {
        let table = table();
        assert_eq!(table.get(ElementId(3)).unwrap().folded_into, Some(ElementId(2)));
        assert_eq!(table.get(ElementId(5)).unwrap().folded_into, Some(ElementId(1)));
        assert_eq!(table.get(ElementId(1)).unwrap().folded_into, None);
    }

    #[test]
    fn storey_for_requires_a_container() {
        let mut table = table();
        let hs = handles(2);
        assert!(table.storey_for(ElementId(3)).is_none());

        table.set_container(ElementId(2), hs[0], hs[1]);
        assert_eq!(table.storey_for(ElementId(3)).unwrap().level_id, ElementId(2));
        assert_eq!(table.storey_for(ElementId(2)).unwrap().container, Some(hs[0]));
    }

    #[test]
    fn folded_members_union() {
        let mut table = table();
        let hs = handles(3);
        assert!(table.add_element(ElementId(2), hs[0]));
        assert!(table.add_element(ElementId(3), hs[1]));
        assert!(table.add_product(ElementId(3), hs[2]));
        assert!(!table.add_element(ElementId(99), hs[0]));

        let (elements, products) = table.folded_members(ElementId(2));
        assert_eq!(elements.len(), 2);
        assert_eq!(products.len(), 1);
    }

    #[test]
    fn level_lookup_by_elevation() {
        let table = table();
        assert_eq!(table.level_at(10.0005, 1e-3), Some(ElementId(2)));
        assert_eq!(table.level_at(14.0, 1e-3), Some(ElementId(3)));
        assert_eq!(table.level_at(15.0, 1e-3), Some(ElementId(2)));
        assert_eq!(table.level_at(-5.0, 1e-3), None);
    }

    #[test]
    fn without_storeys_nothing_folds() {
        let table = LevelTable::from_source(&[SourceLevel::non_storey(1, "Ref", 0.0)]);
        assert!(!table.has_storeys());
        assert_eq!(table.get(ElementId(1)).unwrap().folded_into, None);
        assert_eq!(table.unresolved().count(), 1);
    }
}
