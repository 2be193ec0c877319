// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Lookup of installed packages from the var/db/pkg database.
//!
//! Entries are `<category>/<name>-<version>` directories; categories are
//! scanned once on first use and cached.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::version::{split_name_version, Version};

/// Computes the database directory for a configuration root.
pub fn vardb_dir(root_dir: &Path) -> PathBuf {
    root_dir.join("var/db/pkg")
}

#[derive(Debug)]
pub struct VarDb {
    base_dir: PathBuf,
    // category -> name -> installed version strings
    scanned: RefCell<HashMap<String, HashMap<String, Vec<String>>>>,
}

impl VarDb {
    pub fn new(root_dir: &Path) -> Self {
        Self {
            base_dir: vardb_dir(root_dir),
            scanned: RefCell::new(HashMap::new()),
        }
    }

    fn scan_category(&self, category: &str) -> HashMap<String, Vec<String>> {
        let mut packages: HashMap<String, Vec<String>> = HashMap::new();
        let dir = self.base_dir.join(category);
        let entries = match dir.read_dir() {
            Ok(entries) => entries,
            Err(_) => return packages,
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|e| e.file_name().into_string().ok())
            // In-progress merges leave -MERGING- markers behind.
            .filter(|name| !name.starts_with('.') && !name.starts_with("-MERGING-"))
            .collect();
        names.sort();
        for stem in names {
            if let Some((name, version)) = split_name_version(&stem) {
                packages
                    .entry(name.to_owned())
                    .or_default()
                    .push(version.to_owned());
            }
        }
        packages
    }

    fn with_category<R>(
        &self,
        category: &str,
        f: impl FnOnce(&HashMap<String, Vec<String>>) -> R,
    ) -> R {
        let mut scanned = self.scanned.borrow_mut();
        let packages = scanned
            .entry(category.to_owned())
            .or_insert_with(|| self.scan_category(category));
        f(packages)
    }

    /// Installed version strings of a package, empty if none.
    pub fn installed(&self, category: &str, name: &str) -> Vec<String> {
        self.with_category(category, |packages| {
            packages.get(name).cloned().unwrap_or_default()
        })
    }

    pub fn installed_versions(&self, category: &str, name: &str) -> Vec<Version> {
        self.installed(category, name)
            .iter()
            .filter_map(|s| Version::parse(s, false).ok())
            .collect()
    }

    pub fn is_installed(&self, category: &str, name: &str) -> bool {
        self.num_installed(category, name) > 0
    }

    pub fn num_installed(&self, category: &str, name: &str) -> usize {
        self.with_category(category, |packages| {
            packages.get(name).map(|v| v.len()).unwrap_or(0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::write_files;

    #[test]
    fn test_scan_and_cache() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let dir = dir.as_ref();
        write_files(
            dir,
            [
                ("var/db/pkg/app-editors/vim-9.0.1/CONTENTS", ""),
                ("var/db/pkg/app-editors/vim-8.2/CONTENTS", ""),
                ("var/db/pkg/app-editors/-MERGING-nano-6.0/CONTENTS", ""),
                ("var/db/pkg/sys-apps/portage-3.0.30-r1/CONTENTS", ""),
            ],
        )?;

        let vardb = VarDb::new(dir);
        assert_eq!(vardb.num_installed("app-editors", "vim"), 2);
        assert_eq!(vardb.installed("app-editors", "vim"), vec!["8.2", "9.0.1"]);
        assert!(vardb.is_installed("sys-apps", "portage"));
        assert!(!vardb.is_installed("app-editors", "nano"));
        assert!(!vardb.is_installed("no-such", "pkg"));
        Ok(())
    }
}
