// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Ingestor merging a previously written binary cache into the tree,
//! optionally restricted to the packages of one overlay.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::cache::{CacheError, CacheIngest, CategorySelect, ErrorCallback};
use crate::data::{ExtendedVersion, PackageTree};
use crate::database::header::{DbHeader, OverlayTest, FORMAT_VERSION};
use crate::database::reader::{FetchStage, PackageReader};

#[derive(Debug)]
pub struct PriorCache {
    name: String,
    file: PathBuf,
    /// Restrict to one overlay of the source cache. `None` keeps all.
    overlay: Option<String>,
    /// The overlay key assigned to versions merged into the destination.
    overlay_key: u32,
    /// Never create categories that the destination does not know yet.
    never_add_categories: bool,
    /// PORTDIR of the current settings, for overlay-by-path resolution.
    portdir: Option<String>,
}

impl PriorCache {
    /// Parses a configuration name of the form `db:<file>[:<overlay>]`
    /// (`db*` allows adding categories; overlay `*` means all overlays).
    pub fn from_name(name: &str, default_file: &Path, portdir: Option<&str>) -> Option<Self> {
        let mut fields = name.split(':');
        let head = fields.next()?;
        let never_add_categories = match head.to_ascii_lowercase().as_str() {
            "db" => true,
            "db*" | "*db" => false,
            _ => return None,
        };
        let file = match fields.next() {
            Some(f) if !f.is_empty() => PathBuf::from(f),
            _ => default_file.to_owned(),
        };
        let overlay = match fields.next() {
            None | Some("") | Some("*") => None,
            Some(o) => Some(o.to_owned()),
        };
        if fields.next().is_some() {
            return None;
        }
        Some(Self {
            name: name.to_owned(),
            file,
            overlay,
            overlay_key: 0,
            never_add_categories,
            portdir: portdir.map(str::to_owned),
        })
    }

    pub fn set_overlay_key(&mut self, key: u32) {
        self.overlay_key = key;
    }
}

impl CacheIngest for PriorCache {
    fn describe(&self) -> String {
        self.name.clone()
    }

    fn read_categories(
        &mut self,
        tree: &mut PackageTree,
        select: CategorySelect<'_>,
        _errors: ErrorCallback<'_>,
    ) -> Result<(), CacheError> {
        let file = File::open(&self.file).map_err(|source| CacheError::Open {
            path: self.file.clone(),
            source,
        })?;
        let mut input = BufReader::new(file);
        let header = DbHeader::read(&mut input)?;
        tracing::debug!(
            file = %self.file.display(),
            packages = header.num_packages,
            "merging prior cache"
        );
        if header.format_version != FORMAT_VERSION {
            return Err(CacheError::version_mismatch(
                self.file.clone(),
                header.format_version,
            ));
        }

        // Resolve the requested overlay against the source cache's table.
        let source_overlay: Option<u32> = match &self.overlay {
            None => None,
            Some(pattern) => Some(
                header
                    .find_overlay(pattern, self.portdir.as_deref(), OverlayTest::AllPath)
                    .ok_or_else(|| CacheError::MissingOverlay {
                        path: self.file.clone(),
                        overlay: pattern.clone(),
                    })?,
            ),
        };

        if let CategorySelect::Restrict(set) = select {
            tree.need_fast_access(set);
        }

        let mut reader = PackageReader::new(input, &header);
        while reader.next()? {
            reader.read(FetchStage::Name)?;
            let category = reader.get().category.clone();

            let add_categories =
                matches!(select, CategorySelect::All) && !self.never_add_categories;
            let known = tree.find(&category).is_some();
            if !select.wants(&category) || (!known && !add_categories) {
                reader.skip();
                continue;
            }

            reader.read(FetchStage::All)?;
            let source = reader.take();
            let dest_cat = tree.insert(&category);

            let existed_before = dest_cat.find_package(&source.name).is_some();
            let pkg = dest_cat.add_package(&source.name);
            let mut have_onetime_info = existed_before;

            for version in &source.versions {
                if let Some(wanted) = source_overlay {
                    if version.overlay_key != wanted {
                        continue;
                    }
                }
                let mut copy = ExtendedVersion::new(version.version.clone());
                copy.full_keywords = version.full_keywords.clone();
                copy.slot = version.slot.clone();
                copy.iuse = version.iuse.clone();
                copy.restrict = version.restrict;
                copy.properties = version.properties;
                copy.depend = version.depend.clone();
                copy.rdepend = version.rdepend.clone();
                copy.pdepend = version.pdepend.clone();
                copy.overlay_key = self.overlay_key;
                pkg.add_version(copy);
                if pkg.newest_is_latest() {
                    pkg.description = source.description.clone();
                    pkg.homepage = source.homepage.clone();
                    pkg.licenses = source.licenses.clone();
                    pkg.provide = source.provide.clone();
                    have_onetime_info = true;
                }
            }

            if have_onetime_info {
                pkg.coll_iuse.extend(source.coll_iuse.iter().cloned());
            } else {
                // No version survived the overlay filter.
                let name = source.name.clone();
                dest_cat.delete_package(&name);
            }
        }

        if matches!(select, CategorySelect::Restrict(_)) {
            tree.finish_fast_access();
        }
        tree.prune_empty_categories();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Package;
    use crate::database::writer::write_tree;
    use crate::flags::RestrictFlags;
    use crate::testutil::{sample_header, write_files};
    use crate::version::Version;
    use anyhow::Result;
    use std::collections::BTreeSet;

    fn source_tree() -> PackageTree {
        let mut tree = PackageTree::new();
        let cat = tree.insert("app-editors");

        let vim = cat.add_package("vim");
        vim.description = "editor".to_owned();
        let mut v1 = ExtendedVersion::new(Version::parse("8.2", true).unwrap());
        v1.overlay_key = 0;
        v1.restrict = RestrictFlags::TEST;
        vim.add_version(v1);
        let mut v2 = ExtendedVersion::new(Version::parse("9.0", true).unwrap());
        v2.overlay_key = 1;
        vim.add_version(v2);
        vim.coll_iuse.insert("acl".to_owned());

        let nano = cat.add_package("nano");
        nano.description = "small editor".to_owned();
        let mut v = ExtendedVersion::new(Version::parse("6.0", true).unwrap());
        v.overlay_key = 0;
        nano.add_version(v);
        tree
    }

    fn write_cache(dir: &Path, tree: &PackageTree) -> Result<PathBuf> {
        write_files(dir, [("cache/portdex.db", "")])?;
        let path = dir.join("cache/portdex.db");
        let mut out = std::fs::File::create(&path)?;
        write_tree(&mut out, tree, &sample_header())?;
        Ok(path)
    }

    fn no_errors(msg: &str) {
        panic!("unexpected diagnostic: {msg}");
    }

    #[test]
    fn test_unrestricted_merge() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_cache(dir.as_ref(), &source_tree())?;

        let mut cache =
            PriorCache::from_name(&format!("db*:{}", path.display()), &path, None).unwrap();
        cache.set_overlay_key(3);
        let mut tree = PackageTree::new();
        cache
            .read_categories(&mut tree, CategorySelect::All, &no_errors)
            .unwrap();

        let cat = tree.find("app-editors").unwrap();
        assert_eq!(cat.packages.len(), 2);
        let vim = cat.find_package("vim").unwrap();
        assert_eq!(vim.versions.len(), 2);
        assert!(vim.versions.iter().all(|v| v.overlay_key == 3));
        assert_eq!(vim.versions[0].restrict, RestrictFlags::TEST);
        assert_eq!(vim.description, "editor");
        assert!(vim.coll_iuse.contains("acl"));
        Ok(())
    }

    #[test]
    fn test_overlay_restriction_deletes_emptied_packages() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_cache(dir.as_ref(), &source_tree())?;

        // Restrict to the "guru" overlay: only vim-9.0 survives; nano has
        // no matching version and must disappear.
        let mut cache =
            PriorCache::from_name(&format!("db*:{}:guru", path.display()), &path, None).unwrap();
        let mut tree = PackageTree::new();
        cache
            .read_categories(&mut tree, CategorySelect::All, &no_errors)
            .unwrap();

        let cat = tree.find("app-editors").unwrap();
        assert!(cat.find_package("nano").is_none());
        let vim = cat.find_package("vim").unwrap();
        assert_eq!(vim.versions.len(), 1);
        assert_eq!(vim.versions[0].version.full(), "9.0");
        Ok(())
    }

    #[test]
    fn test_missing_overlay_is_fatal_for_the_pass() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_cache(dir.as_ref(), &source_tree())?;

        let mut cache =
            PriorCache::from_name(&format!("db:{}:nosuch", path.display()), &path, None).unwrap();
        let mut tree = PackageTree::new();
        let result = cache.read_categories(&mut tree, CategorySelect::All, &no_errors);
        assert!(matches!(result, Err(CacheError::MissingOverlay { .. })));
        Ok(())
    }

    #[test]
    fn test_version_mismatch_distinguishes_newer() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_cache(dir.as_ref(), &source_tree())?;
        // Patch the version field (big-endian u32 after the magic).
        let mut bytes = std::fs::read(&path)?;
        bytes[4..8].copy_from_slice(&(FORMAT_VERSION + 5).to_be_bytes());
        std::fs::write(&path, &bytes)?;

        let mut cache = PriorCache::from_name("db", &path, None).unwrap();
        let mut tree = PackageTree::new();
        let err = cache
            .read_categories(&mut tree, CategorySelect::All, &no_errors)
            .unwrap_err();
        assert!(err.to_string().contains("newer"));
        Ok(())
    }

    #[test]
    fn test_restricted_select_skips_unknown_categories() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_cache(dir.as_ref(), &source_tree())?;

        let mut cache = PriorCache::from_name("db", &path, None).unwrap();
        let mut tree = PackageTree::new();
        let filter: BTreeSet<String> = ["no-such".to_owned()].into();
        cache
            .read_categories(&mut tree, CategorySelect::Restrict(&filter), &no_errors)
            .unwrap();
        assert_eq!(tree.num_packages(), 0);
        assert!(tree.find("app-editors").is_none());
        Ok(())
    }

    #[test]
    fn test_single_category_merge_into_existing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_cache(dir.as_ref(), &source_tree())?;

        let mut cache = PriorCache::from_name("db", &path, None).unwrap();
        let mut tree = PackageTree::new();
        tree.insert("app-editors").add_package("vim").description = "seed".to_owned();
        cache
            .read_categories(&mut tree, CategorySelect::Single("app-editors"), &no_errors)
            .unwrap();
        let vim: &Package = tree
            .find("app-editors")
            .unwrap()
            .find_package("vim")
            .unwrap();
        assert_eq!(vim.versions.len(), 2);
        Ok(())
    }
}
