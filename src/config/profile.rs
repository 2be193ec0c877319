// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The cascading profile: the parent chain reached from a leaf profile
//! directory, with every packages/mask/keyword file recorded along the way.
//!
//! Files are collected first ([`CascadingProfile::listadd_profile`]), read
//! into raw pre-lists ([`CascadingProfile::read_remove_files`]) and resolved
//! into mask lists exactly once ([`CascadingProfile::finalize`]), after the
//! full arch set is known.

use std::collections::HashSet;
use std::fs::read_to_string;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

use crate::config::makeconf::{MakeConf, Vars};
use crate::data::Package;
use crate::flags::MaskFlags;
use crate::mask::{KeywordMask, Mask, MaskKind, MaskList};
use crate::ErrorCallback;

const MAX_PROFILE_DEPTH: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ProfileFileKind {
    Packages,
    Mask,
    Unmask,
    Keywords,
    AcceptKeywords,
    World,
}

const PROFILE_FILE_NAMES: &[(&str, ProfileFileKind)] = &[
    ("packages", ProfileFileKind::Packages),
    ("package.mask", ProfileFileKind::Mask),
    ("package.unmask", ProfileFileKind::Unmask),
    ("package.keywords", ProfileFileKind::Keywords),
    ("package.accept_keywords", ProfileFileKind::AcceptKeywords),
];

#[derive(Clone, Debug)]
struct ProfileFile {
    path: PathBuf,
    kind: ProfileFileKind,
    /// Label of the repository the file came from, if discoverable.
    repo: Option<String>,
}

/// One input line waiting for [`CascadingProfile::finalize`].
#[derive(Clone, Debug)]
pub struct PreLine {
    pub text: String,
    pub file: PathBuf,
    pub lineno: usize,
    pub repo: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct CascadingProfile {
    files: Vec<ProfileFile>,
    make_defaults: Vec<PathBuf>,

    p_packages: Vec<PreLine>,
    p_masks: Vec<PreLine>,
    p_unmasks: Vec<PreLine>,
    p_keywords: Vec<PreLine>,
    p_accept_keywords: Vec<PreLine>,
    p_world: Vec<PreLine>,

    pub system: MaskList<Mask>,
    /// Atoms listed without `*`: allowed versions rather than system members.
    pub system_allowed: MaskList<Mask>,
    pub masks: MaskList<Mask>,
    pub unmasks: MaskList<Mask>,
    pub keywords: MaskList<KeywordMask>,
    pub accept_keywords: MaskList<KeywordMask>,
    pub world: MaskList<Mask>,

    finalized: bool,
}

/// Reads the repository label of a tree root from its profiles/repo_name.
pub fn repo_label_of_tree(tree_root: &Path) -> Option<String> {
    let content = read_to_string(tree_root.join("profiles/repo_name")).ok()?;
    let label = content.lines().next()?.trim();
    (!label.is_empty()).then(|| label.to_owned())
}

/// Finds the repository label governing a profile directory by walking up
/// to the nearest ancestor with a `profiles/repo_name` file.
fn repo_label_for(dir: &Path) -> Option<String> {
    for ancestor in dir.ancestors() {
        let repo_name = ancestor.join("profiles/repo_name");
        if let Ok(content) = read_to_string(&repo_name) {
            let label = content.lines().next().unwrap_or("").trim();
            if !label.is_empty() {
                return Some(label.to_owned());
            }
        }
    }
    None
}

fn read_config_lines(path: &Path) -> Vec<(usize, String)> {
    let content = match read_to_string(path) {
        Ok(content) => content,
        Err(_) => return Vec::new(),
    };
    content
        .split('\n')
        .enumerate()
        .map(|(lineno, line)| (lineno + 1, line.trim().to_owned()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .collect()
}

impl CascadingProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Registers a single file outside any profile chain, such as the
    /// primary tree's `profiles/package.mask`.
    pub fn listadd_mask_file(&mut self, path: &Path) {
        self.files.push(ProfileFile {
            path: path.to_owned(),
            kind: ProfileFileKind::Mask,
            repo: repo_label_for(path.parent().unwrap_or(path)),
        });
    }

    pub fn listadd_world_file(&mut self, path: &Path) {
        self.files.push(ProfileFile {
            path: path.to_owned(),
            kind: ProfileFileKind::World,
            repo: None,
        });
    }

    /// Walks the parent chain from a profile directory depth-first and
    /// records every profile file found along the way.
    pub fn listadd_profile(&mut self, dir: &Path, errors: ErrorCallback<'_>) {
        let mut seen = HashSet::new();
        self.add_profile_dir(dir, 0, &mut seen, errors);
    }

    fn add_profile_dir(
        &mut self,
        dir: &Path,
        depth: usize,
        seen: &mut HashSet<PathBuf>,
        errors: ErrorCallback<'_>,
    ) {
        if depth > MAX_PROFILE_DEPTH {
            errors(&format!(
                "profile {} nests deeper than {} parents; loop?",
                dir.display(),
                MAX_PROFILE_DEPTH
            ));
            return;
        }
        let key = dir.to_path_buf();
        if !seen.insert(key) {
            return;
        }

        // Parents first: later entries in the chain take precedence.
        for (_, parent) in read_config_lines(&dir.join("parent")) {
            let parent_dir = if parent.starts_with('/') {
                PathBuf::from(&parent)
            } else {
                dir.join(&parent)
            };
            self.add_profile_dir(&parent_dir, depth + 1, seen, errors);
        }

        let repo = repo_label_for(dir);
        for (name, kind) in PROFILE_FILE_NAMES {
            let path = dir.join(name);
            if path.exists() {
                self.files.push(ProfileFile {
                    path,
                    kind: *kind,
                    repo: repo.clone(),
                });
            }
        }
        let make_defaults = dir.join("make.defaults");
        if make_defaults.exists() {
            self.make_defaults.push(make_defaults);
        }
    }

    /// Reads all collected make.defaults into the settings map, honoring
    /// accumulating keys, and clears the list.
    pub fn read_make_defaults(&mut self, env: &mut Vars, errors: ErrorCallback<'_>) {
        for path in std::mem::take(&mut self.make_defaults) {
            match MakeConf::load(&path, Path::new("/"), false, true) {
                Ok(conf) => conf.evaluate_into(env),
                Err(e) => errors(&format!("{:#}", e)),
            }
        }
    }

    /// Reads all collected mask/keyword files into the pre-lists and clears
    /// the file list. Returns true if any data was read.
    pub fn read_remove_files(&mut self) -> bool {
        let mut changed = false;
        for file in std::mem::take(&mut self.files) {
            for (lineno, text) in read_config_lines(&file.path) {
                changed = true;
                let line = PreLine {
                    text,
                    file: file.path.clone(),
                    lineno,
                    repo: file.repo.clone(),
                };
                match file.kind {
                    ProfileFileKind::Packages => self.p_packages.push(line),
                    ProfileFileKind::Mask => self.p_masks.push(line),
                    ProfileFileKind::Unmask => self.p_unmasks.push(line),
                    ProfileFileKind::Keywords => self.p_keywords.push(line),
                    ProfileFileKind::AcceptKeywords => self.p_accept_keywords.push(line),
                    ProfileFileKind::World => self.p_world.push(line),
                }
            }
        }
        changed
    }

    /// Resolves the pre-lists into mask lists. Must be called exactly once,
    /// after every profile file has been read.
    pub fn finalize(&mut self, errors: ErrorCallback<'_>) -> Result<()> {
        if self.finalized {
            bail!("profile already finalized");
        }
        self.finalized = true;

        let report = |line: &PreLine, what: &dyn std::fmt::Display| {
            errors(&format!(
                "invalid line {} in {}: {:?}: {}",
                line.lineno,
                line.file.display(),
                line.text,
                what
            ));
        };

        for line in std::mem::take(&mut self.p_packages) {
            // `*atom` marks a system package, `-atom` retracts an earlier
            // entry, a bare atom only constrains allowed versions.
            if let Some(rest) = line.text.strip_prefix('*') {
                match Mask::parse(rest, MaskKind::System) {
                    Ok(mask) => self.system.add(mask),
                    Err(e) => report(&line, &e),
                }
            } else if let Some(rest) = line.text.strip_prefix('-') {
                let rest = rest.strip_prefix('*').unwrap_or(rest);
                match rest.parse() {
                    Ok(atom) => {
                        self.system.remove(&atom);
                        self.system_allowed.remove(&atom);
                    }
                    Err(e) => report(&line, &e),
                }
            } else {
                match Mask::parse(&line.text, MaskKind::System) {
                    Ok(mask) => self.system_allowed.add(mask),
                    Err(e) => report(&line, &e),
                }
            }
        }

        for line in std::mem::take(&mut self.p_masks) {
            match Mask::parse(&line.text, MaskKind::Mask) {
                Ok(mask) => self.masks.add(mask),
                Err(e) => report(&line, &e),
            }
        }
        for line in std::mem::take(&mut self.p_unmasks) {
            match Mask::parse(&line.text, MaskKind::Unmask) {
                Ok(mask) => self.unmasks.add(mask),
                Err(e) => report(&line, &e),
            }
        }

        // package.keywords accumulates per atom; package.accept_keywords
        // follows last-write-wins across the parent chain.
        for line in std::mem::take(&mut self.p_keywords) {
            match split_keyword_line(&line.text) {
                Ok(mask) => self.keywords.add(mask),
                Err(e) => report(&line, &e),
            }
        }
        let mut accept_lines = Vec::new();
        for line in std::mem::take(&mut self.p_accept_keywords) {
            match split_keyword_line(&line.text) {
                Ok(mask) => {
                    let key = mask.atom.to_string();
                    accept_lines.retain(|(k, _)| *k != key);
                    accept_lines.push((key, mask));
                }
                Err(e) => report(&line, &e),
            }
        }
        for (_, mask) in accept_lines {
            self.accept_keywords.add(mask);
        }

        for line in std::mem::take(&mut self.p_world) {
            // World files hold plain category/name atoms.
            match Mask::parse(&line.text, MaskKind::World) {
                Ok(mask) => self.world.add(mask),
                Err(e) => report(&line, &e),
            }
        }

        Ok(())
    }

    /// Applies system/mask/unmask/world state to the package's versions.
    pub fn apply_masks(&self, pkg: &mut Package) {
        debug_assert!(self.finalized, "apply_masks before finalize");
        for version in &mut pkg.versions {
            version.maskflags = MaskFlags::empty();
        }
        self.system.apply_masks(pkg, true);
        self.world.apply_masks(pkg, true);
        self.masks.apply_masks(pkg, true);
        self.unmasks.apply_masks(pkg, true);
    }

    /// Per-version accept-keyword tokens contributed by the profile's
    /// package.keywords and package.accept_keywords files.
    pub fn keyword_additions(&self, pkg: &Package) -> Vec<Vec<String>> {
        debug_assert!(self.finalized, "keyword_additions before finalize");
        let mut additions: Vec<Vec<String>> = vec![Vec::new(); pkg.versions.len()];
        for list in [&self.keywords, &self.accept_keywords] {
            for mask in list.get(pkg) {
                for (i, version) in pkg.versions.iter().enumerate() {
                    if mask.atom.matches_version(&version.version, &version.slot) {
                        additions[i]
                            .extend(mask.keywords.split_whitespace().map(str::to_owned));
                    }
                }
            }
        }
        additions
    }
}

/// Splits an `atom [keyword...]` line into a [`KeywordMask`].
pub fn split_keyword_line(text: &str) -> Result<KeywordMask, crate::atom::AtomParseError> {
    let (atom, tokens) = match text.split_once(char::is_whitespace) {
        Some((atom, rest)) => (atom, rest.trim()),
        None => (text, ""),
    };
    Ok(KeywordMask::new(atom.parse()?, tokens))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ExtendedVersion;
    use crate::testutil::write_files;
    use crate::version::Version;

    fn no_errors(msg: &str) {
        panic!("unexpected diagnostic: {msg}");
    }

    fn pkg(category: &str, name: &str, versions: &[&str]) -> Package {
        let mut pkg = Package::new(category, name);
        for v in versions {
            pkg.add_version(ExtendedVersion::new(Version::parse(v, true).unwrap()));
        }
        pkg
    }

    #[test]
    fn test_parent_chain_collection() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let dir = dir.as_ref();
        write_files(
            dir,
            [
                ("repo/profiles/repo_name", "testrepo\n"),
                ("repo/profiles/base/package.mask", "app-editors/vim\n"),
                ("repo/profiles/base/make.defaults", "ARCH=\"amd64\"\n"),
                ("repo/profiles/leaf/parent", "../base\n"),
                (
                    "repo/profiles/leaf/package.unmask",
                    "=app-editors/vim-9.0\n",
                ),
                ("repo/profiles/leaf/packages", "*sys-apps/baselayout\n"),
            ],
        )?;

        let mut profile = CascadingProfile::new();
        profile.listadd_profile(&dir.join("repo/profiles/leaf"), &no_errors);
        let mut env = Vars::new();
        profile.read_make_defaults(&mut env, &no_errors);
        assert_eq!(env.get("ARCH").unwrap(), "amd64");

        assert!(profile.read_remove_files());
        profile.finalize(&no_errors)?;

        // Parent entries come first, leaf entries afterwards.
        assert_eq!(profile.masks.len(), 1);
        assert_eq!(profile.unmasks.len(), 1);
        assert_eq!(profile.system.len(), 1);

        let mut vim = pkg("app-editors", "vim", &["8.2", "9.0"]);
        profile.apply_masks(&mut vim);
        assert!(vim.versions[0].maskflags.contains(MaskFlags::MASKED));
        assert!(vim.versions[1].maskflags.contains(MaskFlags::UNMASKED));
        assert!(!vim.versions[1].maskflags.contains(MaskFlags::MASKED));
        Ok(())
    }

    #[test]
    fn test_packages_negation_removes_system_entry() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let dir = dir.as_ref();
        write_files(
            dir,
            [
                ("profiles/base/packages", "*sys-apps/baselayout\n*sys-apps/findutils\n"),
                ("profiles/leaf/parent", "../base\n"),
                ("profiles/leaf/packages", "-*sys-apps/findutils\n"),
            ],
        )?;

        let mut profile = CascadingProfile::new();
        profile.listadd_profile(&dir.join("profiles/leaf"), &no_errors);
        profile.read_remove_files();
        profile.finalize(&no_errors)?;

        let mut base = pkg("sys-apps", "baselayout", &["2.13"]);
        profile.apply_masks(&mut base);
        assert!(base.versions[0].maskflags.contains(MaskFlags::SYSTEM));

        let mut findutils = pkg("sys-apps", "findutils", &["4.9"]);
        profile.apply_masks(&mut findutils);
        assert!(!findutils.versions[0].maskflags.contains(MaskFlags::SYSTEM));
        Ok(())
    }

    #[test]
    fn test_finalize_twice_fails() -> Result<()> {
        let mut profile = CascadingProfile::new();
        profile.finalize(&no_errors)?;
        assert!(profile.finalize(&no_errors).is_err());
        Ok(())
    }

    #[test]
    fn test_bad_lines_are_dropped_with_diagnostics() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let dir = dir.as_ref();
        write_files(
            dir,
            [(
                "profiles/leaf/package.mask",
                "app-editors/vim\nnot an atom at all\n",
            )],
        )?;

        let mut profile = CascadingProfile::new();
        profile.listadd_profile(&dir.join("profiles/leaf"), &no_errors);
        profile.read_remove_files();
        let messages = std::cell::RefCell::new(Vec::new());
        profile
            .finalize(&|msg| messages.borrow_mut().push(msg.to_owned()))
            .unwrap();
        assert_eq!(profile.masks.len(), 1);
        let messages = messages.into_inner();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("line 2"));
        Ok(())
    }

    #[test]
    fn test_accept_keywords_shadowing_and_keywords_accumulation() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let dir = dir.as_ref();
        write_files(
            dir,
            [
                (
                    "profiles/base/package.accept_keywords",
                    "app-editors/vim ~amd64\n",
                ),
                ("profiles/base/package.keywords", "app-editors/vim x\n"),
                ("profiles/leaf/parent", "../base\n"),
                (
                    "profiles/leaf/package.accept_keywords",
                    "app-editors/vim ~arm\n",
                ),
                ("profiles/leaf/package.keywords", "app-editors/vim y\n"),
            ],
        )?;

        let mut profile = CascadingProfile::new();
        profile.listadd_profile(&dir.join("profiles/leaf"), &no_errors);
        profile.read_remove_files();
        profile.finalize(&no_errors)?;

        let vim = pkg("app-editors", "vim", &["9.0"]);
        let additions = profile.keyword_additions(&vim);
        // keywords accumulate (x and y); accept_keywords shadow (~arm only).
        assert!(additions[0].contains(&"x".to_owned()));
        assert!(additions[0].contains(&"y".to_owned()));
        assert!(additions[0].contains(&"~arm".to_owned()));
        assert!(!additions[0].contains(&"~amd64".to_owned()));
        Ok(())
    }

    #[test]
    fn test_world_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let dir = dir.as_ref();
        write_files(dir, [("var/lib/portage/world", "app-editors/vim\n")])?;

        let mut profile = CascadingProfile::new();
        profile.listadd_world_file(&dir.join("var/lib/portage/world"));
        profile.read_remove_files();
        profile.finalize(&no_errors)?;

        let mut vim = pkg("app-editors", "vim", &["9.0"]);
        profile.apply_masks(&mut vim);
        assert!(vim.versions[0].maskflags.contains(MaskFlags::WORLD));
        Ok(())
    }
}
