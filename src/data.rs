// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The in-memory package tree: categories own packages, packages own
//! versions. Versions hold no back-pointers; anything order-sensitive goes
//! through the owning package.

use std::collections::{BTreeMap, BTreeSet};

use crate::flags::{
    KeywordsFlags, MaskFlags, PropertiesFlags, Redundant, RestrictFlags, SavedKey, SavedMask,
};
use crate::version::Version;

/// A version plus all metadata carried in the index.
#[derive(Clone, Debug, Default)]
pub struct ExtendedVersion {
    pub version: Version,
    pub slot: String,
    /// The verbatim KEYWORDS string of the ebuild.
    pub full_keywords: String,
    pub iuse: Vec<String>,
    pub restrict: RestrictFlags,
    pub properties: PropertiesFlags,
    /// Index into the overlay table of the owning header; 0 is the primary.
    pub overlay_key: u32,
    pub depend: String,
    pub rdepend: String,
    pub pdepend: String,

    pub keyflags: KeywordsFlags,
    pub maskflags: MaskFlags,
    pub redundant: Redundant,
    saved_keyflags: [Option<KeywordsFlags>; 3],
    saved_maskflags: [Option<MaskFlags>; 4],
}

impl ExtendedVersion {
    pub fn new(version: Version) -> Self {
        Self {
            version,
            ..Default::default()
        }
    }

    pub fn save_keyflags(&mut self, slot: SavedKey) {
        self.saved_keyflags[slot as usize] = Some(self.keyflags);
    }

    pub fn restore_keyflags(&mut self, slot: SavedKey) -> bool {
        match self.saved_keyflags[slot as usize] {
            Some(flags) => {
                self.keyflags = flags;
                true
            }
            None => false,
        }
    }

    pub fn save_maskflags(&mut self, slot: SavedMask) {
        self.saved_maskflags[slot as usize] = Some(self.maskflags);
    }

    pub fn restore_maskflags(&mut self, slot: SavedMask) -> bool {
        match self.saved_maskflags[slot as usize] {
            Some(flags) => {
                self.maskflags = flags;
                true
            }
            None => false,
        }
    }
}

/// A package identified by (category, name), owning its versions in
/// insertion order.
#[derive(Clone, Debug, Default)]
pub struct Package {
    pub category: String,
    pub name: String,
    pub description: String,
    pub homepage: String,
    pub licenses: String,
    pub provide: String,
    /// Union of the IUSE flags of all versions.
    pub coll_iuse: BTreeSet<String>,
    pub versions: Vec<ExtendedVersion>,
    /// Two versions with the same (slot, full version) were added.
    pub duplicate_versions: bool,
}

impl Package {
    pub fn new(category: &str, name: &str) -> Self {
        Self {
            category: category.to_owned(),
            name: name.to_owned(),
            ..Default::default()
        }
    }

    pub fn cat_name(&self) -> String {
        format!("{}/{}", self.category, self.name)
    }

    pub fn add_version(&mut self, version: ExtendedVersion) {
        if self
            .versions
            .iter()
            .any(|v| v.slot == version.slot && v.version == version.version)
        {
            self.duplicate_versions = true;
        }
        self.versions.push(version);
    }

    /// The greatest version by full compare. Later insertions win ties.
    pub fn latest(&self) -> Option<&ExtendedVersion> {
        self.versions
            .iter()
            .reduce(|best, v| if v.version >= best.version { v } else { best })
    }

    /// Whether the newest added version is the overall latest.
    pub fn newest_is_latest(&self) -> bool {
        match (self.versions.last(), self.latest()) {
            (Some(last), Some(best)) => last.version == best.version,
            _ => false,
        }
    }

    pub fn accumulate_iuse(&mut self) {
        let flags: Vec<String> = self
            .versions
            .iter()
            .flat_map(|v| v.iuse.iter().cloned())
            .collect();
        self.coll_iuse.extend(flags);
    }

    /// Distinct overlays this package's versions come from.
    pub fn overlay_keys(&self) -> BTreeSet<u32> {
        self.versions.iter().map(|v| v.overlay_key).collect()
    }

    /// Restores a memoized keyword computation for every version. Returns
    /// false (leaving versions untouched) when any version lacks the slot.
    pub fn restore_keyflags(&mut self, slot: SavedKey) -> bool {
        if self
            .versions
            .iter()
            .any(|v| v.saved_keyflags[slot as usize].is_none())
        {
            return false;
        }
        for v in &mut self.versions {
            v.restore_keyflags(slot);
        }
        true
    }

    pub fn save_keyflags(&mut self, slot: SavedKey) {
        for v in &mut self.versions {
            v.save_keyflags(slot);
        }
    }

    pub fn restore_maskflags(&mut self, slot: SavedMask) -> bool {
        if self
            .versions
            .iter()
            .any(|v| v.saved_maskflags[slot as usize].is_none())
        {
            return false;
        }
        for v in &mut self.versions {
            v.restore_maskflags(slot);
        }
        true
    }

    pub fn save_maskflags(&mut self, slot: SavedMask) {
        for v in &mut self.versions {
            v.save_maskflags(slot);
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Category {
    pub name: String,
    pub packages: BTreeMap<String, Package>,
}

impl Category {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            packages: BTreeMap::new(),
        }
    }

    pub fn find_package(&mut self, name: &str) -> Option<&mut Package> {
        self.packages.get_mut(name)
    }

    pub fn add_package(&mut self, name: &str) -> &mut Package {
        let category = self.name.clone();
        self.packages
            .entry(name.to_owned())
            .or_insert_with(|| Package::new(&category, name))
    }

    pub fn delete_package(&mut self, name: &str) {
        self.packages.remove(name);
    }
}

/// All indexed packages, keyed by category name.
#[derive(Clone, Debug, Default)]
pub struct PackageTree {
    categories: BTreeMap<String, Category>,
    fast_added: Option<Vec<String>>,
}

impl PackageTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&mut self, category: &str) -> Option<&mut Category> {
        self.categories.get_mut(category)
    }

    pub fn insert(&mut self, category: &str) -> &mut Category {
        self.categories
            .entry(category.to_owned())
            .or_insert_with(|| Category::new(category))
    }

    pub fn categories(&self) -> impl Iterator<Item = &Category> {
        self.categories.values()
    }

    pub fn packages(&self) -> impl Iterator<Item = &Package> {
        self.categories.values().flat_map(|c| c.packages.values())
    }

    pub fn packages_mut(&mut self) -> impl Iterator<Item = &mut Package> {
        self.categories
            .values_mut()
            .flat_map(|c| c.packages.values_mut())
    }

    pub fn num_categories(&self) -> usize {
        self.categories.len()
    }

    pub fn num_packages(&self) -> usize {
        self.categories.values().map(|c| c.packages.len()).sum()
    }

    /// Pre-creates the given categories so lookups during a bounded ingest
    /// are plain finds. Must be paired with [`PackageTree::finish_fast_access`].
    pub fn need_fast_access(&mut self, categories: &BTreeSet<String>) {
        let mut added = Vec::new();
        for name in categories {
            if !self.categories.contains_key(name) {
                self.categories.insert(name.clone(), Category::new(name));
                added.push(name.clone());
            }
        }
        self.fast_added = Some(added);
    }

    /// Drops categories created by [`PackageTree::need_fast_access`] that
    /// stayed empty.
    pub fn finish_fast_access(&mut self) {
        for name in self.fast_added.take().unwrap_or_default() {
            if self.categories.get(&name).is_some_and(|c| c.packages.is_empty()) {
                self.categories.remove(&name);
            }
        }
    }

    pub fn prune_empty_categories(&mut self) {
        self.categories.retain(|_, c| !c.packages.is_empty());
    }
}
