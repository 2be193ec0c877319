// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A single query test: which fields to extract, the matching algorithm,
//! and the version/package-level filters applied on top.

use std::collections::BTreeSet;

use bitflags::bitflags;

use crate::data::{ExtendedVersion, Package};
use crate::database::reader::FetchStage;
use crate::flags::{KeywordsFlags, MaskFlags, PropertiesFlags, Redundant, RestrictFlags};
use crate::rc::RedundantChecks;
use crate::search::algorithms::MatchAlgorithm;
use crate::search::{EvalContext, QueryError};
use crate::version::Version;

bitflags! {
    /// Fields a test's algorithm runs over.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct MatchField: u32 {
        const NAME = 1 << 0;
        const CATEGORY = 1 << 1;
        const CATEGORY_NAME = 1 << 2;
        const DESCRIPTION = 1 << 3;
        const LICENSE = 1 << 4;
        const HOMEPAGE = 1 << 5;
        const IUSE = 1 << 6;
        const PROVIDE = 1 << 7;
        const SET = 1 << 8;
        const SLOT = 1 << 9;
        const DEPEND = 1 << 10;
        const RDEPEND = 1 << 11;
        const PDEPEND = 1 << 12;

        const DEPS = Self::DEPEND.bits() | Self::RDEPEND.bits() | Self::PDEPEND.bits();
        const ANY = Self::NAME.bits()
            | Self::CATEGORY.bits()
            | Self::DESCRIPTION.bits()
            | Self::HOMEPAGE.bits()
            | Self::LICENSE.bits();
    }
}

/// Which stability class a stability filter requires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StabilityKind {
    Stable,
    Testing,
    NonMasked,
    System,
}

/// Which policy view the stability filter runs against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StabilityScope {
    /// User configuration when present, plain profile otherwise.
    Default,
    /// Always the user configuration view.
    Local,
    /// Always the plain profile view.
    NonLocal,
}

#[derive(Clone, Copy, Debug)]
pub struct StabilityFilter {
    pub kind: StabilityKind,
    pub scope: StabilityScope,
}

/// Pending algorithm selection; compiled in [`PackageTest::finalize`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum AlgorithmChoice {
    Exact,
    Begin,
    End,
    #[default]
    Substring,
    Pattern,
    Regex,
    Fuzzy(Option<usize>),
}

#[derive(Debug, Default)]
pub struct PackageTest {
    field: MatchField,
    choice: AlgorithmChoice,
    pattern: Option<String>,
    algorithm: Option<MatchAlgorithm>,

    invert: bool,
    installed: bool,
    multi_installed: bool,
    upgrade: bool,
    dup_versions: bool,
    dup_packages: bool,
    /// `O`: any version from a non-primary overlay.
    overlay: bool,
    /// Restrict the overlay filter to specific keys.
    overlay_keys: Option<BTreeSet<u32>>,
    /// All versions must come from these keys.
    only_overlay_keys: Option<BTreeSet<u32>>,
    restrict: RestrictFlags,
    properties: PropertiesFlags,
    obsolete: Option<RedundantChecks>,
    stability: Option<StabilityFilter>,
}

impl PackageTest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_field(&mut self, field: MatchField) {
        self.field |= field;
    }

    pub fn set_algorithm(&mut self, choice: AlgorithmChoice) {
        self.choice = choice;
    }

    pub fn set_pattern(&mut self, pattern: &str) {
        self.pattern = Some(pattern.to_owned());
    }

    pub fn toggle_invert(&mut self) {
        self.invert = !self.invert;
    }

    pub fn toggle_installed(&mut self) {
        self.installed = !self.installed;
    }

    pub fn toggle_multi_installed(&mut self) {
        self.multi_installed = !self.multi_installed;
    }

    pub fn toggle_upgrade(&mut self) {
        self.upgrade = !self.upgrade;
    }

    pub fn toggle_dup_versions(&mut self) {
        self.dup_versions = !self.dup_versions;
    }

    pub fn toggle_dup_packages(&mut self) {
        self.dup_packages = !self.dup_packages;
    }

    pub fn toggle_overlay(&mut self) {
        self.overlay = !self.overlay;
    }

    pub fn set_overlay_keys(&mut self, keys: BTreeSet<u32>) {
        self.overlay = true;
        self.overlay_keys = Some(keys);
    }

    pub fn set_only_overlay_keys(&mut self, keys: BTreeSet<u32>) {
        self.only_overlay_keys = Some(keys);
    }

    pub fn add_restrict(&mut self, flags: RestrictFlags) {
        self.restrict |= flags;
    }

    pub fn add_properties(&mut self, flags: PropertiesFlags) {
        self.properties |= flags;
    }

    pub fn set_obsolete(&mut self, checks: RedundantChecks) {
        self.obsolete = Some(checks);
    }

    pub fn set_stability(&mut self, filter: StabilityFilter) {
        self.stability = Some(filter);
    }

    /// Compiles the algorithm and fills defaults. Must run before matching.
    pub fn finalize(&mut self, default_fuzzy_distance: usize) -> Result<(), QueryError> {
        if self.field.is_empty() {
            self.field = MatchField::NAME;
        }
        if let Some(pattern) = &self.pattern {
            self.algorithm = Some(match &self.choice {
                AlgorithmChoice::Exact => MatchAlgorithm::Exact(pattern.clone()),
                AlgorithmChoice::Begin => MatchAlgorithm::Begin(pattern.clone()),
                AlgorithmChoice::End => MatchAlgorithm::End(pattern.clone()),
                AlgorithmChoice::Substring => MatchAlgorithm::Substring(pattern.clone()),
                AlgorithmChoice::Pattern => MatchAlgorithm::pattern(pattern)?,
                AlgorithmChoice::Regex => MatchAlgorithm::regex(pattern)?,
                AlgorithmChoice::Fuzzy(distance) => MatchAlgorithm::Fuzzy {
                    pattern: pattern.clone(),
                    max_distance: distance.unwrap_or(default_fuzzy_distance),
                },
            });
        }
        Ok(())
    }

    /// The fetch stage this test requires.
    pub fn needs(&self) -> FetchStage {
        if self.field.intersects(
            MatchField::DESCRIPTION
                | MatchField::LICENSE
                | MatchField::HOMEPAGE
                | MatchField::IUSE
                | MatchField::PROVIDE,
        ) {
            return FetchStage::All;
        }
        let version_filters = self.installed
            || self.multi_installed
            || self.upgrade
            || self.dup_versions
            || self.dup_packages
            || self.overlay
            || self.overlay_keys.is_some()
            || self.only_overlay_keys.is_some()
            || !self.restrict.is_empty()
            || !self.properties.is_empty()
            || self.obsolete.is_some()
            || self.stability.is_some()
            || self
                .field
                .intersects(MatchField::SLOT | MatchField::DEPS | MatchField::SET);
        if version_filters {
            FetchStage::Versions
        } else {
            FetchStage::Name
        }
    }

    fn field_values(&self, pkg: &Package) -> Vec<String> {
        let mut values = Vec::new();
        if self.field.contains(MatchField::NAME) {
            values.push(pkg.name.clone());
        }
        if self.field.contains(MatchField::CATEGORY) {
            values.push(pkg.category.clone());
        }
        if self.field.contains(MatchField::CATEGORY_NAME) {
            values.push(pkg.cat_name());
        }
        if self.field.contains(MatchField::DESCRIPTION) {
            values.push(pkg.description.clone());
        }
        if self.field.contains(MatchField::LICENSE) {
            values.push(pkg.licenses.clone());
        }
        if self.field.contains(MatchField::HOMEPAGE) {
            values.push(pkg.homepage.clone());
        }
        if self.field.contains(MatchField::PROVIDE) {
            values.push(pkg.provide.clone());
        }
        if self.field.contains(MatchField::IUSE) {
            values.extend(pkg.coll_iuse.iter().cloned());
        }
        if self.field.contains(MatchField::SLOT) {
            values.extend(pkg.versions.iter().map(|v| v.slot.clone()));
        }
        if self.field.contains(MatchField::DEPEND) {
            values.extend(pkg.versions.iter().map(|v| v.depend.clone()));
        }
        if self.field.contains(MatchField::RDEPEND) {
            values.extend(pkg.versions.iter().map(|v| v.rdepend.clone()));
        }
        if self.field.contains(MatchField::PDEPEND) {
            values.extend(pkg.versions.iter().map(|v| v.pdepend.clone()));
        }
        if self.field.contains(MatchField::SET) {
            let mut sets = Vec::new();
            if pkg
                .versions
                .iter()
                .any(|v| v.maskflags.contains(MaskFlags::SYSTEM))
            {
                sets.push("system".to_owned());
            }
            if pkg
                .versions
                .iter()
                .any(|v| v.maskflags.contains(MaskFlags::WORLD))
            {
                sets.push("world".to_owned());
            }
            values.extend(sets);
        }
        values
    }

    /// Runs the policy layers this test depends on. Results are memoized on
    /// the versions, so this is cheap on re-evaluation.
    fn prepare_policy(&self, pkg: &mut Package, ctx: &EvalContext) {
        if self.field.contains(MatchField::SET) || self.upgrade {
            self.apply_masks_for_scope(pkg, ctx, StabilityScope::Default);
        }
        if let Some(filter) = &self.stability {
            self.apply_masks_for_scope(pkg, ctx, filter.scope);
            self.apply_keyflags_for_scope(pkg, ctx, filter.scope);
        }
        if let Some(checks) = &self.obsolete {
            if let Some(user) = &ctx.settings.user_config {
                let union = checks.union();
                user.set_keyflags(pkg, union & Redundant::ALL_KEYWORDS, ctx.settings);
                let _ = user.set_masks(pkg, union & Redundant::ALL_MASKS, false, ctx.settings);
                user.check_files(pkg, union);
            }
        }
    }

    fn apply_masks_for_scope(&self, pkg: &mut Package, ctx: &EvalContext, scope: StabilityScope) {
        let user = ctx.settings.user_config.as_ref();
        match (scope, user) {
            (StabilityScope::NonLocal, _) | (_, None) => ctx.settings.set_masks(pkg),
            (_, Some(user)) => {
                let _ = user.set_masks(pkg, Redundant::empty(), false, ctx.settings);
            }
        }
    }

    fn apply_keyflags_for_scope(
        &self,
        pkg: &mut Package,
        ctx: &EvalContext,
        scope: StabilityScope,
    ) {
        let user = ctx.settings.user_config.as_ref();
        match (scope, user) {
            (StabilityScope::NonLocal, _) | (_, None) => {
                ctx.settings.set_keyflags(pkg, true);
            }
            (_, Some(user)) => {
                user.set_keyflags(pkg, Redundant::empty(), ctx.settings);
            }
        }
    }

    fn stability_matches(&self, filter: &StabilityFilter, version: &ExtendedVersion) -> bool {
        let masked = version.maskflags.contains(MaskFlags::MASKED);
        match filter.kind {
            StabilityKind::Stable => {
                version.keyflags.contains(KeywordsFlags::STABLE) && !masked
            }
            StabilityKind::Testing => {
                (version.keyflags.contains(KeywordsFlags::STABLE)
                    || version.keyflags.contains(KeywordsFlags::ARCHUNSTABLE))
                    && !masked
            }
            StabilityKind::NonMasked => !masked,
            StabilityKind::System => version.maskflags.contains(MaskFlags::SYSTEM),
        }
    }

    fn obsolete_matches(&self, checks: &RedundantChecks, pkg: &Package, ctx: &EvalContext) -> bool {
        let installed = ctx.vardb.installed(&pkg.category, &pkg.name);
        if pkg
            .versions
            .iter()
            .any(|v| v.redundant.intersects(checks.all))
        {
            return true;
        }
        if !checks.installed.is_empty() {
            for version in &pkg.versions {
                if version.redundant.intersects(checks.installed)
                    && installed.iter().any(|i| *i == version.version.full())
                {
                    return true;
                }
            }
        }
        // Installed versions that no longer exist in the tree.
        if ctx.rc.bool("TEST_FOR_NONEXISTENT") && !installed.is_empty() {
            let if_masked = ctx.rc.bool("NONEXISTENT_IF_MASKED");
            let if_other_overlay = ctx.rc.bool("NONEXISTENT_IF_OTHER_OVERLAY");
            for inst in &installed {
                let found = pkg.versions.iter().find(|v| v.version.full() == *inst);
                let exists = match found {
                    None => false,
                    Some(v) => {
                        !(if_masked && v.maskflags.contains(MaskFlags::MASKED))
                            && !(if_other_overlay && v.overlay_key != 0)
                    }
                };
                if !exists {
                    return true;
                }
            }
        }
        false
    }

    fn upgrade_matches(&self, pkg: &Package, ctx: &EvalContext) -> bool {
        let installed = ctx.vardb.installed_versions(&pkg.category, &pkg.name);
        if installed.is_empty() {
            return false;
        }
        let best: Option<&Version> = pkg
            .versions
            .iter()
            .filter(|v| !v.maskflags.contains(MaskFlags::MASKED))
            .map(|v| &v.version)
            .max();
        match best {
            Some(best) => installed.iter().all(|i| i < best),
            None => false,
        }
    }

    /// Evaluates the whole test against a package. Policy layers run (and
    /// memoize their result) first; the outcome honors inversion.
    pub fn matches(&self, pkg: &mut Package, ctx: &EvalContext) -> bool {
        self.prepare_policy(pkg, ctx);
        let mut result = true;

        if let Some(algorithm) = &self.algorithm {
            result = self
                .field_values(pkg)
                .iter()
                .any(|value| algorithm.matches(value));
        }

        if result && self.installed {
            result = ctx.vardb.is_installed(&pkg.category, &pkg.name);
        }
        if result && self.multi_installed {
            result = ctx.vardb.num_installed(&pkg.category, &pkg.name) > 1;
        }
        if result && self.upgrade {
            result = self.upgrade_matches(pkg, ctx);
        }
        if result && self.dup_versions {
            result = pkg.duplicate_versions;
        }
        if result && self.dup_packages {
            let keys = pkg.overlay_keys();
            result = if ctx.rc.bool("DUP_PACKAGES_ONLY_OVERLAYS") {
                keys.iter().filter(|&&k| k != 0).count() > 1
            } else {
                keys.len() > 1
            };
        }
        if result && (self.overlay || self.overlay_keys.is_some()) {
            result = pkg.versions.iter().any(|v| match &self.overlay_keys {
                Some(keys) => keys.contains(&v.overlay_key),
                None => v.overlay_key != 0,
            });
        }
        if result {
            if let Some(keys) = &self.only_overlay_keys {
                result = !pkg.versions.is_empty()
                    && pkg.versions.iter().all(|v| keys.contains(&v.overlay_key));
            }
        }
        if result && !self.restrict.is_empty() {
            result = pkg
                .versions
                .iter()
                .any(|v| v.restrict.contains(self.restrict));
        }
        if result && !self.properties.is_empty() {
            result = pkg
                .versions
                .iter()
                .any(|v| v.properties.contains(self.properties));
        }
        if result {
            if let Some(filter) = &self.stability {
                result = pkg
                    .versions
                    .iter()
                    .any(|v| self.stability_matches(filter, v));
            }
        }
        if result {
            if let Some(checks) = &self.obsolete {
                result = self.obsolete_matches(checks, pkg, ctx);
            }
        }

        result != self.invert
    }
}
