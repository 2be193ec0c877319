// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Portage-side configuration: make.globals/make.conf evaluation, overlay
//! normalization, arch sets and the cascading profile. One
//! [`PortageSettings`] is created at startup and handed by reference to all
//! consumers; nothing mutates it afterwards.

pub mod makeconf;
pub mod profile;
pub mod user;

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use itertools::Itertools;

use crate::data::Package;
use crate::database::header::OverlayIdent;
use crate::flags::SavedKey;
use crate::flags::{classify_keywords, SavedMask};
use crate::rc::RcMap;
use crate::ErrorCallback;
use makeconf::{is_accumulating, MakeConf, Vars};
use profile::{repo_label_of_tree, CascadingProfile};
use user::UserConfig;

/// Environment variables honored before profiles are loaded.
const ENV_EARLY: &[&str] = &["PORTAGE_PROFILE", "PORTDIR", "PORTDIR_OVERLAY"];
/// Environment variables overriding everything else.
const ENV_LATE: &[&str] = &[
    "USE",
    "CONFIG_PROTECT",
    "CONFIG_PROTECT_MASK",
    "FEATURES",
    "ARCH",
    "ACCEPT_KEYWORDS",
];

/// Flags reported by [`resolve_plus_minus`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlusMinus {
    /// A `-*` token cleared the accumulator.
    pub minusasterisk: bool,
    /// A `-token` was processed (regardless of whether it removed
    /// anything; removing an absent token is the classic mistake, removing
    /// a present one is worth a diagnostic too).
    pub minuskeyword: bool,
}

/// Left-to-right resolution of a plus/minus token list into a set.
///
/// With `obsolete_minusasterisk`, minus tokens are kept verbatim instead of
/// being interpreted (the historic behavior some configurations rely on).
pub fn resolve_plus_minus<I, S>(tokens: I, obsolete_minusasterisk: bool) -> (BTreeSet<String>, PlusMinus)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut set = BTreeSet::new();
    let mut flags = PlusMinus::default();
    for token in tokens {
        let token = token.as_ref();
        if obsolete_minusasterisk {
            set.insert(token.to_owned());
            continue;
        }
        if token == "-*" {
            flags.minusasterisk = true;
            set.clear();
        } else if let Some(plain) = token.strip_prefix('-') {
            flags.minuskeyword = true;
            set.remove(plain);
        } else {
            set.insert(token.to_owned());
        }
    }
    (set, flags)
}

/// Lexically normalizes a path: collapses `.`/`..`/doubled separators.
/// Symlinks are not resolved.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[derive(Debug)]
pub struct PortageSettings {
    vars: Vars,
    root: PathBuf,
    /// Normalized and trailing-slash-terminated.
    pub portdir: String,
    /// Normalized overlay paths, primary excluded, duplicates dropped.
    pub overlays: Vec<String>,
    pub arch_set: BTreeSet<String>,
    /// The resolved accept set as an ordered vector.
    pub accepted_keywords: Vec<String>,
    pub accepted_keywords_set: BTreeSet<String>,
    pub obsolete_minusasterisk: bool,
    accept_as_arch: bool,
    pub profile: CascadingProfile,
    pub user_config: Option<UserConfig>,
}

impl PortageSettings {
    /// Reads make.globals and make.conf under `root`, loads the cascading
    /// profile and (optionally) the user configuration.
    pub fn load(
        root: &Path,
        rc: &RcMap,
        with_user: bool,
        errors: ErrorCallback<'_>,
    ) -> Result<Self> {
        let mut vars = Vars::new();
        for file in ["etc/make.globals", "etc/make.conf", "etc/portage/make.conf"] {
            let conf = MakeConf::load(Path::new(file), root, true, true)
                .with_context(|| format!("Failed to evaluate {}", file))?;
            merge_config(&mut vars, &conf);
        }
        override_by_env(&mut vars, ENV_EARLY);

        // Normalize PORTDIR and give it a trailing slash.
        let portdir_raw = match vars.get("PORTDIR") {
            Some(dir) if !dir.is_empty() => root.join(dir.trim_start_matches('/')),
            _ => root.join("usr/portage"),
        };
        let mut portdir = normalize_path(&portdir_raw).to_string_lossy().into_owned();
        if !portdir.ends_with('/') {
            portdir.push('/');
        }
        vars.insert("PORTDIR".to_owned(), portdir.clone());

        // Normalize overlays and erase duplicates.
        let mut overlays = Vec::new();
        for raw in vars
            .get("PORTDIR_OVERLAY")
            .cloned()
            .unwrap_or_default()
            .split_whitespace()
        {
            let path = normalize_path(&root.join(raw.trim_start_matches('/')))
                .to_string_lossy()
                .into_owned();
            if path == portdir.trim_end_matches('/') || overlays.contains(&path) {
                continue;
            }
            overlays.push(path);
        }
        vars.insert("PORTDIR_OVERLAY".to_owned(), overlays.join(" "));

        let mut profile = CascadingProfile::new();
        profile.listadd_mask_file(Path::new(&format!("{portdir}profiles/package.mask")));
        if let Some(dir) = profile_directory(root, &vars) {
            profile.listadd_profile(&dir, errors);
        }
        profile.read_make_defaults(&mut vars, errors);
        profile.read_remove_files();
        for overlay in &overlays {
            profile.listadd_mask_file(&Path::new(overlay).join("profiles/package.mask"));
        }
        profile.listadd_world_file(&root.join("var/lib/portage/world"));
        profile.read_remove_files();

        // The local user profile starts from a copy of the main one.
        let mut local_profile = None;
        if with_user {
            let user_dir = root.join("etc/portage/profile");
            if user_dir.is_dir() {
                let mut local = profile.clone();
                local.listadd_profile(&user_dir, errors);
                local.read_make_defaults(&mut vars, errors);
                if local.read_remove_files() {
                    local_profile = Some(local);
                }
            }
        }

        override_by_env(&mut vars, ENV_LATE);
        tracing::debug!(portdir = %portdir, overlays = overlays.len(), "settings loaded");

        let obsolete_minusasterisk = rc.bool("OBSOLETE_MINUSASTERISK");
        let arch_tokens: Vec<String> = vars
            .get("ARCH")
            .map(|s| s.split_whitespace().map(str::to_owned).collect())
            .unwrap_or_default();
        let (arch_set, _) = resolve_plus_minus(&arch_tokens, obsolete_minusasterisk);

        let mut accept_tokens = arch_tokens;
        if let Some(accept) = vars.get("ACCEPT_KEYWORDS") {
            accept_tokens.extend(accept.split_whitespace().map(str::to_owned));
        }
        let (accepted_keywords_set, _) =
            resolve_plus_minus(&accept_tokens, obsolete_minusasterisk);
        let accepted_keywords: Vec<String> = accepted_keywords_set.iter().cloned().collect();

        profile.finalize(errors)?;
        if let Some(local) = &mut local_profile {
            local.finalize(errors)?;
        }

        let user_config = if with_user {
            Some(UserConfig::load(root, &arch_set, local_profile, errors))
        } else {
            None
        };

        Ok(Self {
            vars,
            root: root.to_owned(),
            portdir,
            overlays,
            arch_set,
            accepted_keywords,
            accepted_keywords_set,
            obsolete_minusasterisk,
            accept_as_arch: rc.bool("ACCEPT_KEYWORDS_AS_ARCH"),
            profile,
            user_config,
        })
    }

    pub fn get(&self, key: &str) -> &str {
        self.vars.get(key).map(String::as_str).unwrap_or("")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The arch set used by redundancy checks.
    pub fn local_arch_set(&self) -> &BTreeSet<String> {
        if self.accept_as_arch {
            &self.accepted_keywords_set
        } else {
            &self.arch_set
        }
    }

    /// Sets keyword stability from ARCH alone or from the full accept set,
    /// memoized through the corresponding saved slot.
    pub fn set_keyflags(&self, pkg: &mut Package, use_accepted_keywords: bool) {
        let (slot, accept) = if use_accepted_keywords {
            (SavedKey::Accept, &self.accepted_keywords_set)
        } else {
            (SavedKey::Arch, &self.arch_set)
        };
        if pkg.restore_keyflags(slot) {
            return;
        }
        for version in &mut pkg.versions {
            version.keyflags =
                classify_keywords(&version.full_keywords, accept, self.local_arch_set());
            version.save_keyflags(slot);
        }
    }

    /// Applies the profile masks, memoized through the PROFILE slot.
    pub fn set_masks(&self, pkg: &mut Package) {
        if pkg.restore_maskflags(SavedMask::Profile) {
            return;
        }
        self.profile.apply_masks(pkg);
        pkg.save_maskflags(SavedMask::Profile);
    }

    /// Snapshots the current mask state into the FILE slot, for the mode
    /// where file-provided masks stand in for the profile.
    pub fn snapshot_file_masks(&self, pkg: &mut Package) {
        pkg.save_maskflags(SavedMask::File);
    }

    /// All known category names: user categories, the primary tree's and
    /// every overlay's profiles/categories, merged.
    pub fn categories(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut push_from = |path: PathBuf| {
            if let Ok(content) = std::fs::read_to_string(path) {
                names.extend(
                    content
                        .lines()
                        .map(str::trim)
                        .filter(|l| !l.is_empty() && !l.starts_with('#'))
                        .map(str::to_owned),
                );
            }
        };
        push_from(self.root.join("etc/portage/categories"));
        push_from(Path::new(&self.portdir).join("profiles/categories"));
        for overlay in &self.overlays {
            push_from(Path::new(overlay).join("profiles/categories"));
        }
        names.into_iter().sorted().dedup().collect()
    }

    /// The overlay table for a freshly written cache: the primary tree at
    /// key 0, then every overlay in configuration order.
    pub fn overlay_table(&self) -> Vec<OverlayIdent> {
        let mut table = Vec::with_capacity(self.overlays.len() + 1);
        let label = repo_label_of_tree(Path::new(&self.portdir)).unwrap_or_default();
        table.push(OverlayIdent::new(&self.portdir, &label, 0));
        for (i, overlay) in self.overlays.iter().enumerate() {
            let label = repo_label_of_tree(Path::new(overlay)).unwrap_or_default();
            table.push(OverlayIdent::new(overlay, &label, (i + 1) as i32));
        }
        table
    }
}

/// Resolves the profile directory: `$PORTAGE_PROFILE` wins, otherwise the
/// `etc/portage/make.profile` symlink is followed.
fn profile_directory(root: &Path, vars: &Vars) -> Option<PathBuf> {
    if let Some(dir) = vars.get("PORTAGE_PROFILE") {
        if !dir.is_empty() {
            return Some(PathBuf::from(dir));
        }
    }
    for link in ["etc/portage/make.profile", "etc/make.profile"] {
        let path = root.join(link);
        if let Ok(target) = path.read_link() {
            let resolved = if target.is_absolute() {
                target
            } else {
                normalize_path(&path.parent().unwrap_or(root).join(target))
            };
            return Some(resolved);
        }
        if path.is_dir() {
            return Some(path);
        }
    }
    None
}

/// Evaluates a configuration file on top of `vars`, appending rather than
/// replacing accumulating keys. Values that expand the key themselves
/// (`USE="${USE} more"`) already include the old value after evaluation.
fn merge_config(vars: &mut Vars, conf: &MakeConf) {
    for (key, value) in conf.evaluate_map(vars) {
        if is_accumulating(&key) && !conf.extends_environment(&key) {
            if let Some(old) = vars.get(&key) {
                if !old.is_empty() {
                    if value.is_empty() {
                        continue;
                    }
                    vars.insert(key, format!("{old} {value}"));
                    continue;
                }
            }
        }
        vars.insert(key, value);
    }
}

fn override_by_env(vars: &mut Vars, keys: &[&str]) {
    for key in keys {
        let Ok(value) = std::env::var(key) else {
            continue;
        };
        if is_accumulating(key) {
            if let Some(old) = vars.get(*key) {
                if !old.is_empty() {
                    vars.insert((*key).to_owned(), format!("{old} {value}"));
                    continue;
                }
            }
        }
        vars.insert((*key).to_owned(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::write_files;

    #[test]
    fn test_resolve_plus_minus_spec_case() {
        let (set, flags) = resolve_plus_minus(["-*", "a", "-a", "b"], false);
        assert_eq!(set, BTreeSet::from(["b".to_owned()]));
        assert!(flags.minusasterisk);
        assert!(flags.minuskeyword);
    }

    #[test]
    fn test_resolve_plus_minus_plain() {
        let (set, flags) = resolve_plus_minus(["amd64", "~amd64"], false);
        assert_eq!(
            set,
            BTreeSet::from(["amd64".to_owned(), "~amd64".to_owned()])
        );
        assert_eq!(flags, PlusMinus::default());
    }

    #[test]
    fn test_resolve_plus_minus_obsolete_keeps_tokens() {
        let (set, flags) = resolve_plus_minus(["-*", "a"], true);
        assert!(set.contains("-*"));
        assert!(set.contains("a"));
        assert!(!flags.minusasterisk);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("/usr//portage/./dir/../")),
            PathBuf::from("/usr/portage")
        );
    }

    #[test]
    fn test_load_settings_from_fixture() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let dir = dir.as_ref();
        write_files(
            dir,
            [
                (
                    "etc/make.globals",
                    "ACCEPT_KEYWORDS=\"amd64\"\nARCH=\"amd64\"\n",
                ),
                (
                    "etc/make.conf",
                    "PORTDIR=usr/portage\nPORTDIR_OVERLAY=\"var/overlay var/overlay ./var/other\"\nACCEPT_KEYWORDS=\"~amd64\"\n",
                ),
                ("usr/portage/profiles/repo_name", "gentoo\n"),
                ("usr/portage/profiles/package.mask", "app-editors/bad\n"),
                ("var/overlay/profiles/repo_name", "guru\n"),
            ],
        )?;

        let rc = RcMap::default();
        let settings = PortageSettings::load(dir, &rc, false, &|msg| {
            panic!("unexpected diagnostic: {msg}")
        })?;

        assert!(settings.portdir.ends_with("usr/portage/"));
        assert_eq!(settings.overlays.len(), 2);
        assert!(settings.overlays[0].ends_with("var/overlay"));
        // ACCEPT_KEYWORDS accumulated over both files.
        assert_eq!(settings.arch_set, BTreeSet::from(["amd64".to_owned()]));
        assert!(settings.accepted_keywords_set.contains("~amd64"));
        assert!(settings.accepted_keywords_set.contains("amd64"));

        let table = settings.overlay_table();
        assert_eq!(table.len(), 3);
        assert_eq!(table[0].label, "gentoo");
        assert_eq!(table[1].label, "guru");
        assert_eq!(table[2].label, "");
        Ok(())
    }

    #[test]
    fn test_profile_masks_are_loaded_and_memoized() -> anyhow::Result<()> {
        use crate::data::ExtendedVersion;
        use crate::flags::MaskFlags;
        use crate::version::Version;

        let dir = tempfile::tempdir()?;
        let dir = dir.as_ref();
        write_files(
            dir,
            [
                ("etc/make.conf", "PORTDIR=usr/portage\nARCH=\"amd64\"\n"),
                ("usr/portage/profiles/package.mask", ">=app-editors/vim-9\n"),
            ],
        )?;

        let settings =
            PortageSettings::load(dir, &RcMap::default(), false, &|msg| panic!("{msg}"))?;

        let mut pkg = Package::new("app-editors", "vim");
        pkg.add_version(ExtendedVersion::new(Version::parse("8.2", true).unwrap()));
        pkg.add_version(ExtendedVersion::new(Version::parse("9.0", true).unwrap()));
        settings.set_masks(&mut pkg);
        assert!(!pkg.versions[0].maskflags.contains(MaskFlags::MASKED));
        assert!(pkg.versions[1].maskflags.contains(MaskFlags::MASKED));
        assert!(pkg.versions[1].maskflags.contains(MaskFlags::PROFILE_MASKED));

        // Memoized through the saved slot: clobber and restore.
        pkg.versions[1].maskflags = MaskFlags::empty();
        settings.set_masks(&mut pkg);
        assert!(pkg.versions[1].maskflags.contains(MaskFlags::MASKED));
        Ok(())
    }
}
