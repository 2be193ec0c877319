// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! User configuration under etc/portage and the per-version stability and
//! redundancy computation built on top of it.
//!
//! The expensive computations are memoized through the saved slots on each
//! version, so repeated queries against the same package are cheap.

use std::collections::BTreeSet;
use std::fs::read_to_string;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use once_cell::unsync::OnceCell;
use walkdir::WalkDir;

use crate::atom::DepAtom;
use crate::config::profile::{split_keyword_line, CascadingProfile};
use crate::config::{resolve_plus_minus, PortageSettings};
use crate::data::Package;
use crate::flags::{KeywordsFlags, MaskFlags, Redundant, SavedKey, SavedMask};
use crate::mask::{KeywordMask, Mask, MaskKind, MaskList};
use crate::ErrorCallback;

/// Strength of the keyword that made a version acceptable, ordered from
/// weakest to strongest. `-*` outranks everything so it always triggers the
/// WEAKER diagnostic when it is what stabilized a version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum ArchUsed {
    Nothing,
    Stable,
    Unstable,
    AlienStable,
    AlienUnstable,
    Everything,
    MinusAsterisk,
}

/// Classifies a single accept-keyword against a version's KEYWORDS.
///
/// `shortcut` skips the group taxonomy when the caller only needs a
/// stable/not-stable answer. STRANGE is flagged for tokens that relate to
/// no keyword and no arch in any spelling.
#[allow(clippy::too_many_arguments)]
fn apply_keyword(
    key: &str,
    keywords: &BTreeSet<String>,
    kf: KeywordsFlags,
    arch_set: &BTreeSet<String>,
    obsolete_minusasterisk: bool,
    redundant: &mut Redundant,
    check: Redundant,
    shortcut: bool,
) -> ArchUsed {
    if !obsolete_minusasterisk && key.starts_with('-') && !keywords.contains(key) {
        *redundant |= check & Redundant::STRANGE;
        return ArchUsed::Nothing;
    }
    if !keywords.contains(key) {
        // Not found.
        if key == "**" {
            return ArchUsed::Everything;
        }
        if key == "*" && kf.contains(KeywordsFlags::SOMESTABLE) {
            return ArchUsed::AlienStable;
        }
        if key == "~*" {
            if kf.contains(KeywordsFlags::TILDESTARMATCH) {
                return ArchUsed::AlienUnstable;
            }
            *redundant |= check & Redundant::STRANGE;
            return ArchUsed::Nothing;
        }

        // The remaining outcomes only decide whether STRANGE is flagged,
        // so skip the scan when nobody asked.
        if !check.contains(Redundant::STRANGE) {
            return ArchUsed::Nothing;
        }

        let (blank, searched) = if let Some(b) = key.strip_prefix('-') {
            (b, '-')
        } else if let Some(b) = key.strip_prefix('~') {
            (b, '~')
        } else {
            (key, '\0')
        };

        // Is the blank keyword in the arch set, in any spelling?
        if arch_set.contains(blank)
            || arch_set.contains(&format!("~{blank}"))
            || arch_set.contains(&format!("-{blank}"))
        {
            return ArchUsed::Nothing;
        }
        // Is it in KEYWORDS under another spelling?
        if searched != '\0' && keywords.contains(blank) {
            return ArchUsed::Nothing;
        }
        if searched != '~' && keywords.contains(&format!("~{blank}")) {
            return ArchUsed::Nothing;
        }
        if searched != '-' && keywords.contains(&format!("-{blank}")) {
            return ArchUsed::Nothing;
        }

        *redundant |= Redundant::STRANGE;
        return ArchUsed::Nothing;
    }

    // Found.
    if shortcut {
        // We do not care what stabilized it.
        return ArchUsed::Stable;
    }
    if let Some(blank) = key.strip_prefix('~') {
        if key == "~*" {
            return ArchUsed::AlienUnstable;
        }
        if arch_set.contains(key) || arch_set.contains(blank) {
            return ArchUsed::Unstable;
        }
        return ArchUsed::AlienUnstable;
    }
    if key.starts_with('-') {
        return ArchUsed::MinusAsterisk;
    }
    if key == "*" {
        return ArchUsed::AlienStable;
    }
    if key == "**" {
        return ArchUsed::Everything;
    }
    if arch_set.contains(key) || arch_set.contains(&format!("~{key}")) {
        return ArchUsed::Stable;
    }
    ArchUsed::AlienStable
}

/// Reads an atom-per-line file, or every file inside it (sorted) when the
/// path is a directory.
fn config_lines(path: &Path) -> Vec<(PathBuf, usize, String)> {
    let mut out = Vec::new();
    if path.is_dir() {
        for entry in WalkDir::new(path)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            push_lines(entry.path(), &mut out);
        }
    } else if path.is_file() {
        push_lines(path, &mut out);
    }
    out
}

fn push_lines(path: &Path, out: &mut Vec<(PathBuf, usize, String)>) {
    let Ok(content) = read_to_string(path) else {
        return;
    };
    for (lineno, line) in content.split('\n').enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        out.push((path.to_owned(), lineno + 1, line.to_owned()));
    }
}

fn grab_masks(path: &Path, kind: MaskKind, list: &mut MaskList<Mask>, errors: ErrorCallback<'_>) {
    for (file, lineno, text) in config_lines(path) {
        match Mask::parse(&text, kind) {
            Ok(mask) => list.add(mask),
            Err(e) => errors(&format!(
                "invalid line {} in {}: {}",
                lineno,
                file.display(),
                e
            )),
        }
    }
}

fn grab_keyword_list(path: &Path, errors: ErrorCallback<'_>) -> MaskList<KeywordMask> {
    let mut list = MaskList::new();
    for (file, lineno, text) in config_lines(path) {
        match split_keyword_line(&text) {
            Ok(mask) => list.add(mask),
            Err(e) => errors(&format!(
                "invalid line {} in {}: {}",
                lineno,
                file.display(),
                e
            )),
        }
    }
    list
}

#[derive(Debug)]
pub struct UserConfig {
    root: PathBuf,
    /// package.mask and package.unmask entries, in file order.
    localmasks: MaskList<Mask>,
    /// package.keywords with per-atom last-line-wins semantics.
    keywords: MaskList<KeywordMask>,
    use_list: OnceCell<MaskList<KeywordMask>>,
    env_list: OnceCell<MaskList<KeywordMask>>,
    license_list: OnceCell<MaskList<KeywordMask>>,
    cflags_list: OnceCell<MaskList<KeywordMask>>,
    /// The local user profile (etc/portage/profile), when present.
    pub profile: Option<CascadingProfile>,
}

impl UserConfig {
    pub fn load(
        root: &Path,
        arch_set: &BTreeSet<String>,
        profile: Option<CascadingProfile>,
        errors: ErrorCallback<'_>,
    ) -> Self {
        let mut localmasks = MaskList::new();
        grab_masks(
            &root.join("etc/portage/package.mask"),
            MaskKind::Mask,
            &mut localmasks,
            errors,
        );
        grab_masks(
            &root.join("etc/portage/package.unmask"),
            MaskKind::Unmask,
            &mut localmasks,
            errors,
        );

        let keywords =
            read_keywords_file(&root.join("etc/portage/package.keywords"), arch_set, errors);

        Self {
            root: root.to_owned(),
            localmasks,
            keywords,
            use_list: OnceCell::new(),
            env_list: OnceCell::new(),
            license_list: OnceCell::new(),
            cflags_list: OnceCell::new(),
            profile,
        }
    }

    /// Applies user masks on top of the profile mask state, memoized in the
    /// USER slot. Returns whether any user mask matched.
    ///
    /// With `file_mask_is_profile` the baseline comes from the FILE
    /// snapshot instead of the profile; the snapshot must have been taken.
    pub fn set_masks(
        &self,
        pkg: &mut Package,
        check: Redundant,
        file_mask_is_profile: bool,
        settings: &PortageSettings,
    ) -> Result<bool> {
        if (check & Redundant::ALL_MASKS).is_empty() && pkg.restore_maskflags(SavedMask::User) {
            return Ok(false);
        }
        if file_mask_is_profile {
            if !pkg.restore_maskflags(SavedMask::File) {
                bail!("internal error: tried to restore a file-mask snapshot that was never taken");
            }
        } else {
            self.set_profile_masks(pkg, settings);
        }
        let applied = self.apply_local_masks(pkg, check);
        pkg.save_maskflags(SavedMask::User);
        Ok(applied)
    }

    /// Profile masks with the user profile overlaid, memoized in the
    /// USERPROFILE slot.
    pub fn set_profile_masks(&self, pkg: &mut Package, settings: &PortageSettings) {
        if pkg.restore_maskflags(SavedMask::UserProfile) {
            return;
        }
        match &self.profile {
            Some(profile) => profile.apply_masks(pkg),
            None => settings.set_masks(pkg),
        }
        pkg.save_maskflags(SavedMask::UserProfile);
    }

    fn apply_local_masks(&self, pkg: &mut Package, check: Redundant) -> bool {
        let masks: Vec<(MaskKind, DepAtom)> = self
            .localmasks
            .get(pkg)
            .into_iter()
            .map(|m| (m.kind, m.atom.clone()))
            .collect();
        if masks.is_empty() {
            return false;
        }

        let n = pkg.versions.len();
        let mut mask_hits = vec![0u32; n];
        let mut unmask_hits = vec![0u32; n];
        let mut mask_nochange = vec![false; n];
        let mut unmask_nochange = vec![false; n];

        for (kind, atom) in &masks {
            for (i, version) in pkg.versions.iter_mut().enumerate() {
                if !atom.matches_version(&version.version, &version.slot) {
                    continue;
                }
                match kind {
                    MaskKind::Mask => {
                        if version.maskflags.contains(MaskFlags::MASKED) {
                            mask_nochange[i] = true;
                        }
                        mask_hits[i] += 1;
                        version.maskflags |= MaskFlags::MASKED;
                        version.maskflags -= MaskFlags::UNMASKED;
                    }
                    MaskKind::Unmask => {
                        if !version.maskflags.contains(MaskFlags::MASKED) {
                            unmask_nochange[i] = true;
                        }
                        unmask_hits[i] += 1;
                        version.maskflags -= MaskFlags::MASKED;
                        version.maskflags |= MaskFlags::UNMASKED;
                    }
                    _ => {}
                }
            }
        }

        for (i, version) in pkg.versions.iter_mut().enumerate() {
            let mut redundant = Redundant::empty();
            if mask_hits[i] > 0 {
                redundant |= check & Redundant::IN_MASK;
                if mask_hits[i] > 1 {
                    redundant |= check & Redundant::DOUBLE_MASK;
                }
                if mask_nochange[i] {
                    redundant |= check & Redundant::MASK;
                }
            }
            if unmask_hits[i] > 0 {
                redundant |= check & Redundant::IN_UNMASK;
                if unmask_hits[i] > 1 {
                    redundant |= check & Redundant::DOUBLE_UNMASK;
                }
                if unmask_nochange[i] {
                    redundant |= check & Redundant::UNMASK;
                }
            }
            version.redundant |= redundant;
        }
        true
    }

    /// Computes keyword stability for every version, folding in user and
    /// profile keyword entries, and stamps the requested redundancy bits.
    /// Memoized in the USER slot. Returns whether any user entry matched.
    pub fn set_keyflags(
        &self,
        pkg: &mut Package,
        check: Redundant,
        settings: &PortageSettings,
    ) -> bool {
        if (check & Redundant::ALL_KEYWORDS).is_empty() && pkg.restore_keyflags(SavedKey::User) {
            return false;
        }

        let obsolete = settings.obsolete_minusasterisk;
        let arch_set = settings.local_arch_set();
        let n = pkg.versions.len();

        // Collect the tokens each version gains from package.keywords and
        // the profile's keyword files. Only the user file feeds the
        // IN_KEYWORDS diagnostic.
        let mut user_added: Vec<Vec<String>> = vec![Vec::new(); n];
        let mut profile_added: Vec<Vec<String>> = vec![Vec::new(); n];
        let masks: Vec<(DepAtom, String, bool)> = self
            .keywords
            .get(pkg)
            .into_iter()
            .map(|m| (m.atom.clone(), m.keywords.clone(), m.locally_double))
            .collect();
        let matched = !masks.is_empty();
        for (atom, tokens, locally_double) in &masks {
            for (i, version) in pkg.versions.iter_mut().enumerate() {
                if !atom.matches_version(&version.version, &version.slot) {
                    continue;
                }
                user_added[i].extend(tokens.split_whitespace().map(str::to_owned));
                if *locally_double {
                    version.redundant |= check & Redundant::DOUBLE_LINE;
                }
            }
        }
        let profile = self.profile.as_ref().unwrap_or(&settings.profile);
        for (i, extra) in profile.keyword_additions(pkg).into_iter().enumerate() {
            profile_added[i].extend(extra);
        }

        let shortcut = !check.intersects(Redundant::MIXED | Redundant::WEAKER);
        for (i, version) in pkg.versions.iter_mut().enumerate() {
            let mut redundant = version.redundant;
            let mut kf = crate::flags::classify_keywords(
                &version.full_keywords,
                &settings.accepted_keywords_set,
                arch_set,
            );
            version.keyflags = kf;
            version.save_keyflags(SavedKey::Accept);
            let ori_is_stable = kf.contains(KeywordsFlags::STABLE);

            let added_here = !user_added[i].is_empty() || !profile_added[i].is_empty();
            let mut calc = matched || added_here;
            if calc {
                if !user_added[i].is_empty() {
                    // Something was added beyond the plain accept set.
                    redundant |= check & Redundant::IN_KEYWORDS;
                } else if !added_here {
                    // Nothing changed for this version; recompute only when
                    // a deeper check was requested.
                    let other_checks = Redundant::ALL_KEYWORDS
                        - Redundant::DOUBLE_LINE
                        - Redundant::IN_KEYWORDS;
                    if (check & other_checks).is_empty() {
                        calc = false;
                    }
                }
            }

            if calc {
                let keywords_set: BTreeSet<String> = version
                    .full_keywords
                    .split_whitespace()
                    .map(str::to_owned)
                    .collect();

                let mut all_tokens: Vec<String> = settings.accepted_keywords.clone();
                all_tokens.extend(user_added[i].iter().cloned());
                all_tokens.extend(profile_added[i].iter().cloned());

                if check.contains(Redundant::DOUBLE) {
                    let mut sorted = all_tokens.clone();
                    sorted.sort();
                    let before = sorted.len();
                    sorted.dedup();
                    if sorted.len() != before {
                        redundant |= Redundant::DOUBLE;
                    }
                }

                let (mut kv_set, pm) = resolve_plus_minus(&all_tokens, obsolete);
                if pm.minuskeyword {
                    redundant |= check & Redundant::DOUBLE;
                }
                if pm.minusasterisk && !obsolete {
                    redundant |= check & Redundant::MINUSASTERISK;
                }

                // Apply the original accept keywords first, removing them
                // from the set so they never trigger diagnostics meant for
                // user entries.
                let mut stable = false;
                for ori in &settings.accepted_keywords {
                    if !kv_set.remove(ori) {
                        // Removed by a minus token.
                        continue;
                    }
                    if apply_keyword(
                        ori,
                        &keywords_set,
                        kf,
                        arch_set,
                        obsolete,
                        &mut redundant,
                        Redundant::empty(),
                        true,
                    ) != ArchUsed::Nothing
                    {
                        stable = true;
                    }
                }

                // Now the remaining, user-supplied keywords.
                let mut arch_used = ArchUsed::Nothing;
                for key in &kv_set {
                    let arch_curr = apply_keyword(
                        key,
                        &keywords_set,
                        kf,
                        arch_set,
                        obsolete,
                        &mut redundant,
                        check,
                        shortcut,
                    );
                    if arch_curr == ArchUsed::Nothing {
                        continue;
                    }
                    if arch_used < arch_curr {
                        arch_used = arch_curr;
                    }
                    if stable || ori_is_stable {
                        redundant |= check & Redundant::MIXED;
                    }
                    stable = true;
                }

                if check.contains(Redundant::WEAKER) {
                    let arch_needed = if ori_is_stable {
                        ArchUsed::Nothing
                    } else if kf.contains(KeywordsFlags::ARCHUNSTABLE) {
                        ArchUsed::Unstable
                    } else if kf.contains(KeywordsFlags::ALIENSTABLE) {
                        ArchUsed::AlienStable
                    } else if kf.contains(KeywordsFlags::ALIENUNSTABLE) {
                        ArchUsed::AlienUnstable
                    } else {
                        ArchUsed::Everything
                    };
                    if arch_used > arch_needed {
                        redundant |= Redundant::WEAKER;
                    }
                }

                if stable == kf.contains(KeywordsFlags::STABLE) {
                    redundant |= check & Redundant::NO_CHANGE;
                } else if stable {
                    kf |= KeywordsFlags::STABLE;
                } else {
                    kf -= KeywordsFlags::STABLE;
                }
            }

            version.keyflags = kf;
            version.save_keyflags(SavedKey::User);
            version.redundant = redundant;
        }
        matched
    }

    fn lazy_list<'a>(
        &self,
        cell: &'a OnceCell<MaskList<KeywordMask>>,
        file: &str,
    ) -> &'a MaskList<KeywordMask> {
        cell.get_or_init(|| grab_keyword_list(&self.root.join(file), &|_| {}))
    }

    fn check_list(
        &self,
        pkg: &mut Package,
        list: &MaskList<KeywordMask>,
        flag_double: Redundant,
        flag_in: Redundant,
    ) -> bool {
        let masks: Vec<(DepAtom, String)> = list
            .get(pkg)
            .into_iter()
            // Entries without a token list configure nothing.
            .filter(|m| !m.keywords.is_empty())
            .map(|m| (m.atom.clone(), m.keywords.clone()))
            .collect();
        if masks.is_empty() {
            return false;
        }
        let n = pkg.versions.len();
        let mut hits = vec![0u32; n];
        for (atom, _) in &masks {
            for (i, version) in pkg.versions.iter().enumerate() {
                if atom.matches_version(&version.version, &version.slot) {
                    hits[i] += 1;
                }
            }
        }
        for (i, version) in pkg.versions.iter_mut().enumerate() {
            if hits[i] == 0 {
                continue;
            }
            version.redundant |= flag_in;
            if hits[i] > 1 {
                version.redundant |= flag_double;
            }
        }
        true
    }

    /// The IN_*/DOUBLE_* checks over the simple token-list files. Each file
    /// is read on first use only.
    pub fn check_files(&self, pkg: &mut Package, check: Redundant) {
        const FILES: &[(&str, Redundant, Redundant)] = &[
            ("etc/portage/package.use", Redundant::IN_USE, Redundant::DOUBLE_USE),
            ("etc/portage/package.env", Redundant::IN_ENV, Redundant::DOUBLE_ENV),
            (
                "etc/portage/package.license",
                Redundant::IN_LICENSE,
                Redundant::DOUBLE_LICENSE,
            ),
            (
                "etc/portage/package.cflags",
                Redundant::IN_CFLAGS,
                Redundant::DOUBLE_CFLAGS,
            ),
        ];
        for (file, flag_in, flag_double) in FILES {
            if !check.intersects(*flag_in | *flag_double) {
                continue;
            }
            let cell = if *flag_in == Redundant::IN_USE {
                &self.use_list
            } else if *flag_in == Redundant::IN_ENV {
                &self.env_list
            } else if *flag_in == Redundant::IN_LICENSE {
                &self.license_list
            } else {
                &self.cflags_list
            };
            let list = self.lazy_list(cell, file);
            self.check_list(pkg, list, check & *flag_double, check & *flag_in);
        }
    }

    pub fn has_keyword_entries(&self) -> bool {
        !self.keywords.is_empty()
    }
}

/// Reads package.keywords with the quirky established semantics: for a
/// repeated atom only the last line's tokens survive, but the atom is
/// remembered as locally double; a line without tokens implicitly means
/// `~arch` for every plain arch of the arch set.
fn read_keywords_file(
    path: &Path,
    arch_set: &BTreeSet<String>,
    errors: ErrorCallback<'_>,
) -> MaskList<KeywordMask> {
    let default_keywords: String = arch_set
        .iter()
        .filter(|a| !a.starts_with('-') && !a.starts_with('~'))
        .map(|a| format!("~{a}"))
        .collect::<Vec<_>>()
        .join(" ");

    // First pass: last content per atom, remembering duplicates.
    let lines = config_lines(path);
    let mut have: Vec<(String, String, bool)> = Vec::new();
    for (_, _, text) in &lines {
        let (name, content) = match text.split_once(char::is_whitespace) {
            Some((name, rest)) => (name.to_owned(), rest.trim().to_owned()),
            None => (text.clone(), default_keywords.clone()),
        };
        match have.iter_mut().find(|(n, _, _)| *n == name) {
            Some(entry) => {
                entry.1 = content;
                entry.2 = true;
            }
            None => have.push((name, content, false)),
        }
    }

    // Second pass: emit in original line order with the final content.
    let mut list = MaskList::new();
    for (file, lineno, text) in &lines {
        let name = match text.split_once(char::is_whitespace) {
            Some((name, _)) => name,
            None => text.as_str(),
        };
        let Some((_, content, locally_double)) = have.iter().find(|(n, _, _)| n == name) else {
            continue;
        };
        match name.parse::<DepAtom>() {
            Ok(atom) => {
                let mut mask = KeywordMask::new(atom, content.clone());
                mask.locally_double = *locally_double;
                list.add(mask);
            }
            Err(e) => errors(&format!(
                "invalid line {} in {}: {}",
                lineno,
                file.display(),
                e
            )),
        }
    }
    list
}
