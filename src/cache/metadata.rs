// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The metadata ingestor family: flat and assign cache layouts under
//! several directory schemes, selected by a configuration name such as
//! `metadata-md5-or-flat` or `repo-assign:/some/path`.

use std::path::{Path, PathBuf};

use itertools::Itertools;

use crate::cache::{
    assign::{read_assign_file, verify_md5},
    flat::read_flat_file,
    CacheError, CacheIngest, CategorySelect, EbuildInfo, ErrorCallback,
};
use crate::data::{Category, ExtendedVersion, PackageTree};
use crate::flags::{PropertiesFlags, RestrictFlags};
use crate::version::{split_name_version, Version};

const METADATA_PATH: &str = "metadata/cache";
const METADATA_MD5_PATH: &str = "metadata/md5-cache";
const PORTAGE_CACHE_PATH: &str = "var/cache/edb/dep";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PathMode {
    /// `var/cache/edb/dep/<repo-ident>` keyed by the repository name.
    Repository,
    /// `var/cache/edb/dep/<full portdir path>`.
    Full,
    /// `<portdir>/metadata/cache`.
    Metadata,
    /// `<portdir>/metadata/md5-cache`.
    MetadataMd5,
    /// md5-cache when present, falling back to the legacy metadata cache.
    MetadataMd5Or,
}

#[derive(Debug)]
pub struct MetadataCache {
    path_mode: PathMode,
    /// For `MetadataMd5Or` this is the format of the fallback directory;
    /// the md5 directory is always assign-formatted.
    flat: bool,
    check_md5: bool,
    override_path: Option<PathBuf>,
    type_name: String,

    /// Configuration root (usually `/`).
    root: PathBuf,
    /// The repository this ingestor reads.
    portdir: PathBuf,
    /// The repository's label from profiles/repo_name, if any.
    overlay_label: String,
    overlay_key: u32,
}

fn contains_token(name: &str, token: &str) -> bool {
    name.to_ascii_lowercase().contains(token)
}

/// The last non-empty component of a repository root, used for the
/// `x-<basename>` fallback when profiles/repo_name is missing.
fn path_basename(path: &Path) -> String {
    let s = path.to_string_lossy();
    s.trim_end_matches('/')
        .rsplit('/')
        .find(|part| !part.is_empty())
        .unwrap_or("")
        .to_owned()
}

impl MetadataCache {
    /// Parses a configuration name into an ingestor, or `None` when the
    /// name belongs to another ingestor family.
    ///
    /// Recognized tokens: `metadata`, `md5`, `flat`, `assign`, `repo`,
    /// `portage-2.0`, `portage-2.1`, `backport`; an override path may
    /// follow after `:`.
    pub fn from_name(
        name: &str,
        root: &Path,
        portdir: &Path,
        overlay_label: &str,
        overlay_key: u32,
    ) -> Option<Self> {
        let (pure, override_path) = match name.split_once(':') {
            Some((head, path)) => (head, Some(PathBuf::from(path))),
            None => (name, None),
        };

        let mut check_md5 = false;
        let (path_mode, flat) = if contains_token(pure, "metadata") {
            let s_flat = contains_token(pure, "flat");
            let s_assign = !s_flat && contains_token(pure, "assign");
            if contains_token(pure, "md5") {
                if s_flat || s_assign {
                    if override_path.is_some() {
                        (PathMode::MetadataMd5, false)
                    } else {
                        (PathMode::MetadataMd5Or, s_flat)
                    }
                } else {
                    check_md5 = true;
                    (PathMode::MetadataMd5, false)
                }
            } else {
                (PathMode::Metadata, !s_assign)
            }
        } else if contains_token(pure, "repo") {
            if contains_token(pure, "flat") {
                (PathMode::Repository, true)
            } else if contains_token(pure, "assign") {
                (PathMode::Repository, false)
            } else {
                return None;
            }
        } else if pure.eq_ignore_ascii_case("flat") || contains_token(pure, "portage-2.0") {
            (PathMode::Full, true)
        } else if pure.eq_ignore_ascii_case("assign")
            || contains_token(pure, "backport")
            || contains_token(pure, "portage-2.1")
        {
            (PathMode::Full, false)
        } else {
            return None;
        };

        let mut type_name = match path_mode {
            PathMode::Metadata => "metadata-".to_owned(),
            PathMode::MetadataMd5 => "metadata-md5".to_owned(),
            PathMode::MetadataMd5Or => "metadata-md5-or-".to_owned(),
            PathMode::Repository => "repo-".to_owned(),
            PathMode::Full => String::new(),
        };
        if path_mode != PathMode::MetadataMd5 {
            type_name.push_str(if flat { "flat" } else { "assign" });
        }
        if let Some(path) = &override_path {
            type_name.push(':');
            type_name.push_str(&path.to_string_lossy());
        }

        Some(Self {
            path_mode,
            flat,
            check_md5,
            override_path,
            type_name,
            root: root.to_owned(),
            portdir: portdir.to_owned(),
            overlay_label: overlay_label.to_owned(),
            overlay_key,
        })
    }

    /// The category-less cache directory for the primary scheme.
    fn base_dir(&self) -> PathBuf {
        if let Some(path) = &self.override_path {
            return path.clone();
        }
        match self.path_mode {
            PathMode::Metadata => self.portdir.join(METADATA_PATH),
            PathMode::MetadataMd5 | PathMode::MetadataMd5Or => {
                self.portdir.join(METADATA_MD5_PATH)
            }
            PathMode::Full => {
                let rel = self
                    .portdir
                    .to_string_lossy()
                    .trim_start_matches('/')
                    .to_owned();
                self.root.join(PORTAGE_CACHE_PATH).join(rel)
            }
            PathMode::Repository => {
                let ident = if self.overlay_label.is_empty() {
                    format!("x-{}", path_basename(&self.portdir))
                } else {
                    self.overlay_label.clone()
                };
                self.root.join(PORTAGE_CACHE_PATH).join(ident)
            }
        }
    }

    /// Resolves the directory and effective file format for one category.
    ///
    /// In `MetadataMd5Or` mode the format can only be chosen after probing
    /// the md5 directory: the md5-cache is assign-formatted, the legacy
    /// fallback uses the configured format.
    fn resolve(&self, category: &str) -> (PathBuf, bool) {
        let primary = self.base_dir().join(category);
        if self.path_mode != PathMode::MetadataMd5Or {
            return (primary, self.flat);
        }
        if primary.is_dir() {
            (primary, false)
        } else {
            (self.portdir.join(METADATA_PATH).join(category), self.flat)
        }
    }

    fn read_info(&self, path: &Path, flat: bool) -> anyhow::Result<EbuildInfo> {
        if flat {
            read_flat_file(path)
        } else {
            read_assign_file(path)
        }
    }

    fn list_cache_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = match dir.read_dir() {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .filter_map(|e| e.file_name().into_string().ok())
                .filter(|name| !name.starts_with('.') && name.contains('-'))
                .collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }

    fn make_version(&self, version: Version, info: &EbuildInfo) -> ExtendedVersion {
        let mut v = ExtendedVersion::new(version);
        v.full_keywords = info.keywords.clone();
        v.slot = info.slot.clone();
        v.iuse = info.iuse.split_whitespace().map(str::to_owned).collect();
        v.restrict = RestrictFlags::parse(&info.restrict);
        v.properties = PropertiesFlags::parse(&info.properties);
        v.overlay_key = self.overlay_key;
        v.depend = info.depend.clone();
        v.rdepend = info.rdepend.clone();
        v.pdepend = info.pdepend.clone();
        v
    }

    fn read_category(&self, cat: &mut Category, errors: ErrorCallback<'_>) {
        let (dir, flat) = self.resolve(&cat.name);
        let names = Self::list_cache_files(&dir);
        let category = cat.name.clone();

        let mut i = 0;
        while i < names.len() {
            let Some((name, _)) = split_name_version(&names[i]) else {
                errors(&format!(
                    "cannot split {:?} into package and version",
                    names[i]
                ));
                i += 1;
                continue;
            };
            let pkg_name = name.to_owned();
            let pkg = cat.add_package(&pkg_name);
            // Info of the latest version seen so far, for the one-time
            // fields copied at the package boundary.
            let mut newest_info: Option<EbuildInfo> = None;

            while i < names.len() {
                let Some((name, ver)) = split_name_version(&names[i]) else {
                    errors(&format!(
                        "cannot split {:?} into package and version",
                        names[i]
                    ));
                    i += 1;
                    break;
                };
                if name != pkg_name {
                    break;
                }
                let file = names[i].clone();
                i += 1;

                let version = match Version::parse(ver, false) {
                    Ok(version) => version,
                    Err(e) => {
                        errors(&e.to_string());
                        continue;
                    }
                };
                let info = match self.read_info(&dir.join(&file), flat) {
                    Ok(info) => info,
                    Err(e) => {
                        errors(&format!("{:#}", e));
                        continue;
                    }
                };
                if self.check_md5 {
                    let ebuild = self
                        .portdir
                        .join(&category)
                        .join(&pkg_name)
                        .join(format!("{file}.ebuild"));
                    match verify_md5(&info, &ebuild) {
                        Ok(true) => {}
                        Ok(false) => {
                            errors(&format!("checksum mismatch for {}", ebuild.display()));
                            continue;
                        }
                        Err(_) => {
                            // No ebuild to verify against; trust the cache.
                        }
                    }
                }
                pkg.add_version(self.make_version(version, &info));
                if pkg.newest_is_latest() {
                    newest_info = Some(info);
                }
            }

            if let Some(info) = newest_info {
                pkg.description = info.description;
                pkg.homepage = info.homepage;
                pkg.licenses = info.license;
                pkg.provide = info.provide;
            }
            if pkg.versions.is_empty() {
                // Nothing survived parsing or checksum verification.
                cat.delete_package(&pkg_name);
            } else {
                pkg.accumulate_iuse();
            }
        }
    }

    fn discover_categories(&self) -> Vec<String> {
        let mut dirs: Vec<PathBuf> = vec![self.base_dir()];
        if self.path_mode == PathMode::MetadataMd5Or {
            dirs.push(self.portdir.join(METADATA_PATH));
        }
        dirs.iter()
            .filter_map(|dir| dir.read_dir().ok())
            .flatten()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| !name.starts_with('.'))
            .sorted()
            .dedup()
            .collect()
    }
}

impl CacheIngest for MetadataCache {
    fn describe(&self) -> String {
        format!("{} @ {}", self.type_name, self.portdir.display())
    }

    fn read_categories(
        &mut self,
        tree: &mut PackageTree,
        select: CategorySelect<'_>,
        errors: ErrorCallback<'_>,
    ) -> Result<(), CacheError> {
        let categories: Vec<String> = match select {
            CategorySelect::All => self.discover_categories(),
            CategorySelect::Restrict(set) => set.iter().cloned().collect(),
            CategorySelect::Single(name) => vec![name.to_owned()],
        };
        for name in categories {
            if !select.wants(&name) {
                continue;
            }
            let cat = match select {
                CategorySelect::All => tree.insert(&name),
                _ => match tree.find(&name) {
                    Some(cat) => cat,
                    None => continue,
                },
            };
            self.read_category(cat, errors);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::write_files;
    use anyhow::Result;

    fn ingest(cache: &mut MetadataCache) -> PackageTree {
        let mut tree = PackageTree::new();
        cache
            .read_categories(&mut tree, CategorySelect::All, &|msg| {
                panic!("unexpected diagnostic: {msg}")
            })
            .unwrap();
        tree
    }

    #[test]
    fn test_name_parsing() {
        let root = Path::new("/");
        let portdir = Path::new("/usr/portage");
        let mk = |name: &str| MetadataCache::from_name(name, root, portdir, "gentoo", 0);

        assert_eq!(mk("metadata-md5").unwrap().path_mode, PathMode::MetadataMd5);
        assert!(mk("metadata-md5").unwrap().check_md5);
        assert_eq!(
            mk("metadata-md5-or-flat").unwrap().path_mode,
            PathMode::MetadataMd5Or
        );
        assert!(mk("metadata-md5-or-flat").unwrap().flat);
        assert_eq!(
            mk("metadata-md5-or-assign").unwrap().path_mode,
            PathMode::MetadataMd5Or
        );
        assert!(!mk("metadata-md5-or-assign").unwrap().flat);
        // An override path forces the plain md5 layout.
        let with_path = mk("metadata-md5-or-flat:/somewhere").unwrap();
        assert_eq!(with_path.path_mode, PathMode::MetadataMd5);
        assert_eq!(with_path.override_path, Some(PathBuf::from("/somewhere")));

        assert_eq!(mk("metadata-flat").unwrap().path_mode, PathMode::Metadata);
        assert!(mk("metadata-flat").unwrap().flat);
        assert!(!mk("metadata-assign").unwrap().flat);
        assert_eq!(mk("repo-flat").unwrap().path_mode, PathMode::Repository);
        assert_eq!(mk("portage-2.0").unwrap().path_mode, PathMode::Full);
        assert!(mk("portage-2.0").unwrap().flat);
        assert!(!mk("portage-2.1").unwrap().flat);
        assert!(!mk("backport").unwrap().flat);
        assert!(mk("repo").is_none());
        assert!(mk("sqlite").is_none());
    }

    #[test]
    fn test_repository_ident_fallback() {
        let root = Path::new("/");
        let with_label =
            MetadataCache::from_name("repo-assign", root, Path::new("/var/overlay/"), "guru", 1)
                .unwrap();
        assert_eq!(
            with_label.base_dir(),
            PathBuf::from("/var/cache/edb/dep/guru")
        );

        let nameless =
            MetadataCache::from_name("repo-assign", root, Path::new("/var/overlay/"), "", 1)
                .unwrap();
        assert_eq!(
            nameless.base_dir(),
            PathBuf::from("/var/cache/edb/dep/x-overlay")
        );
    }

    #[test]
    fn test_md5_ingest_groups_packages() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let dir = dir.as_ref();
        write_files(
            dir,
            [
                (
                    "portage/metadata/md5-cache/app-editors/vim-8.2",
                    "DESCRIPTION=old vim\nKEYWORDS=amd64\nSLOT=0\nIUSE=acl\n",
                ),
                (
                    "portage/metadata/md5-cache/app-editors/vim-9.0",
                    "DESCRIPTION=new vim\nKEYWORDS=~amd64\nSLOT=0\nIUSE=acl sound\nHOMEPAGE=https://www.vim.org/\n",
                ),
                (
                    "portage/metadata/md5-cache/app-editors/nano-6.0",
                    "DESCRIPTION=small editor\nKEYWORDS=amd64\nSLOT=0\n",
                ),
            ],
        )?;

        let mut cache = MetadataCache::from_name(
            "metadata-md5-or-flat",
            dir,
            &dir.join("portage"),
            "gentoo",
            0,
        )
        .unwrap();
        let mut tree = ingest(&mut cache);

        let cat = tree.find("app-editors").unwrap();
        assert_eq!(cat.packages.len(), 2);
        let vim = cat.find_package("vim").unwrap();
        assert_eq!(vim.versions.len(), 2);
        // One-time fields come from the latest version only.
        assert_eq!(vim.description, "new vim");
        assert_eq!(vim.homepage, "https://www.vim.org/");
        // coll_iuse accumulates over all versions.
        assert!(vim.coll_iuse.contains("sound"));
        assert!(vim.coll_iuse.contains("acl"));
        Ok(())
    }

    #[test]
    fn test_md5_or_falls_back_to_flat_metadata() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let dir = dir.as_ref();
        // No md5-cache directory; only the legacy flat cache exists.
        write_files(
            dir,
            [(
                "portage/metadata/cache/app-editors/vim-9.0",
                "\n\n0\n\n\n\nvim\nAn editor\namd64\n\nacl\n\n\n\n\n\n",
            )],
        )?;

        let mut cache = MetadataCache::from_name(
            "metadata-md5-or-flat",
            dir,
            &dir.join("portage"),
            "gentoo",
            0,
        )
        .unwrap();
        let mut tree = ingest(&mut cache);

        let vim = tree
            .find("app-editors")
            .unwrap()
            .find_package("vim")
            .unwrap();
        assert_eq!(vim.description, "An editor");
        assert_eq!(vim.versions[0].full_keywords, "amd64");
        Ok(())
    }

    #[test]
    fn test_bad_version_is_skipped_with_diagnostic() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let dir = dir.as_ref();
        write_files(
            dir,
            [
                (
                    "portage/metadata/md5-cache/app-editors/vim-9.0",
                    "DESCRIPTION=vim\nKEYWORDS=amd64\nSLOT=0\n",
                ),
                ("portage/metadata/md5-cache/app-editors/bad-thing", ""),
            ],
        )?;

        let mut cache = MetadataCache::from_name(
            "metadata-md5-or-assign",
            dir,
            &dir.join("portage"),
            "gentoo",
            0,
        )
        .unwrap();
        let mut tree = PackageTree::new();
        let messages = std::cell::RefCell::new(Vec::new());
        cache
            .read_categories(&mut tree, CategorySelect::All, &|msg| {
                messages.borrow_mut().push(msg.to_owned());
            })
            .unwrap();

        assert!(tree
            .find("app-editors")
            .unwrap()
            .find_package("vim")
            .is_some());
        let messages = messages.into_inner();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("bad-thing"));
        Ok(())
    }
}
