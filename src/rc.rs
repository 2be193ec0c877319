// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The tool's own option store: a read-only typed view over key/value pairs
//! with built-in defaults. Loading configuration files into the map is the
//! caller's concern.

use std::collections::HashMap;

use crate::flags::Redundant;

const DEFAULTS: &[(&str, &str)] = &[
    ("CACHE_FILE", "/var/cache/portdex/portdex.db"),
    ("CACHE_METHOD", "metadata-md5-or-flat"),
    ("ACCEPT_KEYWORDS_AS_ARCH", "true"),
    ("OBSOLETE_MINUSASTERISK", "false"),
    ("LEVENSHTEIN_DISTANCE", "2"),
    ("DUP_PACKAGES_ONLY_OVERLAYS", "false"),
    ("DUP_VERSIONS_ONLY_OVERLAYS", "false"),
    ("TEST_FOR_REDUNDANCY", "true"),
    ("REDUNDANT_IF_DOUBLE", "some"),
    ("REDUNDANT_IF_DOUBLE_LINE", "some"),
    ("REDUNDANT_IF_MIXED", "false"),
    ("REDUNDANT_IF_WEAKER", "all-installed"),
    ("REDUNDANT_IF_STRANGE", "some"),
    ("REDUNDANT_IF_NO_CHANGE", "all-installed"),
    ("REDUNDANT_IF_MINUSASTERISK", "some"),
    ("REDUNDANT_IF_IN_KEYWORDS", "false"),
    ("REDUNDANT_IF_MASK_NO_CHANGE", "all-installed"),
    ("REDUNDANT_IF_UNMASK_NO_CHANGE", "all-installed"),
    ("REDUNDANT_IF_DOUBLE_MASKED", "some"),
    ("REDUNDANT_IF_DOUBLE_UNMASKED", "some"),
    ("REDUNDANT_IF_DOUBLE_USE", "some"),
    ("REDUNDANT_IF_DOUBLE_ENV", "some"),
    ("REDUNDANT_IF_DOUBLE_LICENSE", "some"),
    ("REDUNDANT_IF_DOUBLE_CFLAGS", "some"),
    ("REDUNDANT_IF_IN_MASK", "false"),
    ("REDUNDANT_IF_IN_UNMASK", "false"),
    ("REDUNDANT_IF_IN_USE", "false"),
    ("REDUNDANT_IF_IN_ENV", "false"),
    ("REDUNDANT_IF_IN_LICENSE", "false"),
    ("REDUNDANT_IF_IN_CFLAGS", "false"),
    ("TEST_FOR_NONEXISTENT", "true"),
    ("NONEXISTENT_IF_MASKED", "false"),
    ("NONEXISTENT_IF_OTHER_OVERLAY", "true"),
];

/// How a redundancy check applies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RedScope {
    /// Never check.
    Never,
    /// Check all versions.
    All,
    /// Check installed versions only.
    Installed,
}

/// The union of requested redundancy bits, split by scope.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RedundantChecks {
    pub all: Redundant,
    pub installed: Redundant,
}

impl RedundantChecks {
    pub fn union(&self) -> Redundant {
        self.all | self.installed
    }

    pub fn is_empty(&self) -> bool {
        self.union().is_empty()
    }
}

#[derive(Clone, Debug, Default)]
pub struct RcMap {
    values: HashMap<String, String>,
}

impl RcMap {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_owned(), value.to_owned());
    }

    pub fn string(&self, key: &str) -> &str {
        if let Some(value) = self.values.get(key) {
            return value;
        }
        DEFAULTS
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
            .unwrap_or("")
    }

    pub fn bool(&self, key: &str) -> bool {
        matches!(
            self.string(key).to_ascii_lowercase().as_str(),
            "true" | "yes" | "on" | "1"
        )
    }

    pub fn int(&self, key: &str) -> i64 {
        self.string(key).trim().parse().unwrap_or(0)
    }

    /// Parses an option of the REDUNDANT_IF_* family.
    pub fn red_scope(&self, key: &str) -> RedScope {
        match self.string(key).to_ascii_lowercase().as_str() {
            "false" | "no" | "off" | "" => RedScope::Never,
            "all-installed" | "some-installed" | "installed" => RedScope::Installed,
            // "true", "all", "some", ...
            _ => RedScope::All,
        }
    }

    /// Collects the redundancy bits enabled by the configuration, as a
    /// caller would request them for the obsolescence test.
    pub fn redundant_checks(&self) -> RedundantChecks {
        let mut checks = RedundantChecks::default();
        if !self.bool("TEST_FOR_REDUNDANCY") {
            return checks;
        }
        const KEYS: &[(&str, Redundant)] = &[
            ("REDUNDANT_IF_DOUBLE", Redundant::DOUBLE),
            ("REDUNDANT_IF_DOUBLE_LINE", Redundant::DOUBLE_LINE),
            ("REDUNDANT_IF_MIXED", Redundant::MIXED),
            ("REDUNDANT_IF_WEAKER", Redundant::WEAKER),
            ("REDUNDANT_IF_STRANGE", Redundant::STRANGE),
            ("REDUNDANT_IF_NO_CHANGE", Redundant::NO_CHANGE),
            ("REDUNDANT_IF_MINUSASTERISK", Redundant::MINUSASTERISK),
            ("REDUNDANT_IF_IN_KEYWORDS", Redundant::IN_KEYWORDS),
            ("REDUNDANT_IF_MASK_NO_CHANGE", Redundant::MASK),
            ("REDUNDANT_IF_UNMASK_NO_CHANGE", Redundant::UNMASK),
            ("REDUNDANT_IF_DOUBLE_MASKED", Redundant::DOUBLE_MASK),
            ("REDUNDANT_IF_DOUBLE_UNMASKED", Redundant::DOUBLE_UNMASK),
            ("REDUNDANT_IF_DOUBLE_USE", Redundant::DOUBLE_USE),
            ("REDUNDANT_IF_DOUBLE_ENV", Redundant::DOUBLE_ENV),
            ("REDUNDANT_IF_DOUBLE_LICENSE", Redundant::DOUBLE_LICENSE),
            ("REDUNDANT_IF_DOUBLE_CFLAGS", Redundant::DOUBLE_CFLAGS),
            ("REDUNDANT_IF_IN_MASK", Redundant::IN_MASK),
            ("REDUNDANT_IF_IN_UNMASK", Redundant::IN_UNMASK),
            ("REDUNDANT_IF_IN_USE", Redundant::IN_USE),
            ("REDUNDANT_IF_IN_ENV", Redundant::IN_ENV),
            ("REDUNDANT_IF_IN_LICENSE", Redundant::IN_LICENSE),
            ("REDUNDANT_IF_IN_CFLAGS", Redundant::IN_CFLAGS),
        ];
        for (key, bit) in KEYS {
            match self.red_scope(key) {
                RedScope::Never => {}
                RedScope::All => checks.all |= *bit,
                RedScope::Installed => checks.installed |= *bit,
            }
        }
        checks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_overrides() {
        let mut rc = RcMap::default();
        assert!(rc.bool("TEST_FOR_REDUNDANCY"));
        assert_eq!(rc.int("LEVENSHTEIN_DISTANCE"), 2);
        rc.set("LEVENSHTEIN_DISTANCE", "5");
        assert_eq!(rc.int("LEVENSHTEIN_DISTANCE"), 5);
        assert_eq!(rc.string("NO_SUCH_KEY"), "");
    }

    #[test]
    fn test_redundant_checks_partition() {
        let mut rc = RcMap::default();
        rc.set("REDUNDANT_IF_DOUBLE", "true");
        rc.set("REDUNDANT_IF_WEAKER", "all-installed");
        rc.set("REDUNDANT_IF_STRANGE", "false");
        let checks = rc.redundant_checks();
        assert!(checks.all.contains(Redundant::DOUBLE));
        assert!(checks.installed.contains(Redundant::WEAKER));
        assert!(!checks.union().contains(Redundant::STRANGE));

        rc.set("TEST_FOR_REDUNDANCY", "false");
        assert!(rc.redundant_checks().is_empty());
    }
}
