// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Masks and the indexed containers holding them.
//!
//! A [`MaskList`] keeps entries in insertion order, bucketed by
//! (category, name) for exact atoms; atoms with wildcards land in a scan
//! bucket consulted on every lookup.

use std::collections::HashMap;
use std::str::FromStr;

use crate::atom::{AtomParseError, DepAtom};
use crate::data::Package;
use crate::flags::MaskFlags;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaskKind {
    Mask,
    Unmask,
    System,
    World,
    Keywords,
    AcceptKeywords,
}

#[derive(Clone, Debug)]
pub struct Mask {
    pub atom: DepAtom,
    pub kind: MaskKind,
}

impl Mask {
    pub fn parse(line: &str, kind: MaskKind) -> Result<Self, AtomParseError> {
        Ok(Self {
            atom: DepAtom::from_str(line)?,
            kind,
        })
    }
}

/// An atom carrying keyword tokens, from package.keywords-style files.
#[derive(Clone, Debug)]
pub struct KeywordMask {
    pub atom: DepAtom,
    /// Whitespace-separated tokens following the atom.
    pub keywords: String,
    /// The same atom appeared on more than one line of its file.
    pub locally_double: bool,
}

impl KeywordMask {
    pub fn new(atom: DepAtom, keywords: impl Into<String>) -> Self {
        Self {
            atom,
            keywords: keywords.into(),
            locally_double: false,
        }
    }
}

pub trait MaskEntry {
    fn atom(&self) -> &DepAtom;
}

impl MaskEntry for Mask {
    fn atom(&self) -> &DepAtom {
        &self.atom
    }
}

impl MaskEntry for KeywordMask {
    fn atom(&self) -> &DepAtom {
        &self.atom
    }
}

/// Insertion-ordered container of masks, indexed by (category, name).
#[derive(Clone, Debug)]
pub struct MaskList<T> {
    entries: Vec<T>,
    buckets: HashMap<(String, String), Vec<usize>>,
    scan: Vec<usize>,
}

impl<T> Default for MaskList<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            buckets: HashMap::new(),
            scan: Vec::new(),
        }
    }
}

impl<T: MaskEntry> MaskList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn add(&mut self, entry: T) {
        let index = self.entries.len();
        let atom = entry.atom();
        if atom.has_wildcard_name() {
            self.scan.push(index);
        } else {
            self.buckets
                .entry((atom.category.clone(), atom.name.clone()))
                .or_default()
                .push(index);
        }
        self.entries.push(entry);
    }

    /// Removes all entries whose atom renders identically to `atom`.
    pub fn remove(&mut self, atom: &DepAtom) {
        let target = atom.to_string();
        let dead: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.atom().to_string() == target)
            .map(|(i, _)| i)
            .collect();
        if dead.is_empty() {
            return;
        }
        for indices in self.buckets.values_mut() {
            indices.retain(|i| !dead.contains(i));
        }
        self.scan.retain(|i| !dead.contains(i));
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    /// All masks constraining this package, in insertion order.
    pub fn get(&self, pkg: &Package) -> Vec<&T> {
        let mut indices: Vec<usize> = self
            .buckets
            .get(&(pkg.category.clone(), pkg.name.clone()))
            .map(|v| v.clone())
            .unwrap_or_default();
        indices.extend(
            self.scan
                .iter()
                .filter(|&&i| {
                    self.entries[i]
                        .atom()
                        .matches_package(&pkg.category, &pkg.name)
                })
                .copied(),
        );
        indices.sort_unstable();
        indices.into_iter().map(|i| &self.entries[i]).collect()
    }
}

impl MaskList<Mask> {
    /// Applies all matching masks to the package's versions, in insertion
    /// order. A later unmask overrides an earlier mask and vice versa.
    ///
    /// `from_profile` additionally stamps `PROFILE_MASKED` on masked
    /// versions, so the profile origin stays visible after user unmasks.
    pub fn apply_masks(&self, pkg: &mut Package, from_profile: bool) -> bool {
        let masks: Vec<(MaskKind, DepAtom)> = self
            .get(pkg)
            .into_iter()
            .map(|m| (m.kind, m.atom.clone()))
            .collect();
        let applied = !masks.is_empty();
        for (kind, atom) in masks {
            for version in &mut pkg.versions {
                if !atom.matches_version(&version.version, &version.slot) {
                    continue;
                }
                match kind {
                    MaskKind::Mask => {
                        version.maskflags |= MaskFlags::MASKED;
                        version.maskflags -= MaskFlags::UNMASKED;
                        if from_profile {
                            version.maskflags |= MaskFlags::PROFILE_MASKED;
                        }
                    }
                    MaskKind::Unmask => {
                        version.maskflags -= MaskFlags::MASKED;
                        version.maskflags |= MaskFlags::UNMASKED;
                    }
                    MaskKind::System => version.maskflags |= MaskFlags::SYSTEM,
                    MaskKind::World => version.maskflags |= MaskFlags::WORLD,
                    MaskKind::Keywords | MaskKind::AcceptKeywords => {}
                }
            }
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ExtendedVersion;
    use crate::version::Version;

    fn pkg_with(versions: &[&str]) -> Package {
        let mut pkg = Package::new("app-editors", "vim");
        for v in versions {
            pkg.add_version(ExtendedVersion::new(Version::parse(v, true).unwrap()));
        }
        pkg
    }

    fn mask(line: &str, kind: MaskKind) -> Mask {
        Mask::parse(line, kind).unwrap()
    }

    #[test]
    fn test_bucket_and_scan_lookup() {
        let mut list = MaskList::new();
        list.add(mask("app-editors/vim", MaskKind::Mask));
        list.add(mask("app-*/*", MaskKind::Unmask));
        list.add(mask("dev-lang/rust", MaskKind::Mask));

        let pkg = pkg_with(&["1.0"]);
        let hits = list.get(&pkg);
        assert_eq!(hits.len(), 2);
        // Insertion order: the exact atom first, then the wildcard.
        assert_eq!(hits[0].kind, MaskKind::Mask);
        assert_eq!(hits[1].kind, MaskKind::Unmask);
    }

    #[test]
    fn test_mask_then_unmask_ends_unmasked() {
        let mut list = MaskList::new();
        list.add(mask("app-editors/vim", MaskKind::Mask));
        list.add(mask("=app-editors/vim-1.0", MaskKind::Unmask));

        let mut pkg = pkg_with(&["1.0", "2.0"]);
        list.apply_masks(&mut pkg, true);

        let v1 = &pkg.versions[0];
        assert!(v1.maskflags.contains(MaskFlags::UNMASKED));
        assert!(!v1.maskflags.contains(MaskFlags::MASKED));
        // The profile origin survives the unmask.
        assert!(v1.maskflags.contains(MaskFlags::PROFILE_MASKED));

        let v2 = &pkg.versions[1];
        assert!(v2.maskflags.contains(MaskFlags::MASKED));
    }

    #[test]
    fn test_version_range_restricts_application() {
        let mut list = MaskList::new();
        list.add(mask(">=app-editors/vim-2", MaskKind::Mask));

        let mut pkg = pkg_with(&["1.0", "2.0", "3.0"]);
        list.apply_masks(&mut pkg, false);
        let masked: Vec<bool> = pkg
            .versions
            .iter()
            .map(|v| v.maskflags.contains(MaskFlags::MASKED))
            .collect();
        assert_eq!(masked, vec![false, true, true]);
    }

    #[test]
    fn test_system_flag() {
        let mut list = MaskList::new();
        list.add(mask("app-editors/vim", MaskKind::System));
        let mut pkg = pkg_with(&["1.0"]);
        list.apply_masks(&mut pkg, true);
        assert!(pkg.versions[0].maskflags.contains(MaskFlags::SYSTEM));
        assert!(!pkg.versions[0].maskflags.contains(MaskFlags::MASKED));
    }

    #[test]
    fn test_remove_by_atom() {
        let mut list = MaskList::new();
        list.add(mask("app-editors/vim", MaskKind::System));
        list.add(mask("dev-lang/rust", MaskKind::System));
        list.remove(&"app-editors/vim".parse().unwrap());
        assert!(list.get(&pkg_with(&["1.0"])).is_empty());
    }
}
