// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Package atoms as used in profile and user configuration files:
//! `[op]category/name[-version][:slot]`, with `*` wildcards allowed in the
//! category and name of versionless atoms.

use std::fmt::{self, Display};
use std::str::FromStr;

use thiserror::Error;

use crate::version::{split_name_version, Version};

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid atom {atom:?}: {reason}")]
pub struct AtomParseError {
    pub atom: String,
    pub reason: String,
}

/// Version comparison operators.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    strum_macros::AsRefStr,
    strum_macros::Display,
    strum_macros::EnumString,
)]
pub enum VersionOp {
    #[strum(serialize = "<")]
    Less,
    #[strum(serialize = "<=")]
    LessOrEqual,
    #[strum(serialize = "=")]
    Equal { wildcard: bool },
    #[strum(serialize = "~")]
    EqualExceptRevision,
    #[strum(serialize = ">")]
    Greater,
    #[strum(serialize = ">=")]
    GreaterOrEqual,
}

/// A parsed atom. Category and name may contain `*` globs when no version
/// constraint is present.
#[derive(Clone, Debug, PartialEq)]
pub struct DepAtom {
    pub category: String,
    pub name: String,
    pub op: Option<VersionOp>,
    pub version: Option<Version>,
    pub slot: Option<String>,
}

fn err(atom: &str, reason: impl Into<String>) -> AtomParseError {
    AtomParseError {
        atom: atom.to_owned(),
        reason: reason.into(),
    }
}

impl FromStr for DepAtom {
    type Err = AtomParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let original = s;
        let (op, rest) = if let Some(rest) = s.strip_prefix("<=") {
            (Some(VersionOp::LessOrEqual), rest)
        } else if let Some(rest) = s.strip_prefix(">=") {
            (Some(VersionOp::GreaterOrEqual), rest)
        } else if let Some(rest) = s.strip_prefix('<') {
            (Some(VersionOp::Less), rest)
        } else if let Some(rest) = s.strip_prefix('>') {
            (Some(VersionOp::Greater), rest)
        } else if let Some(rest) = s.strip_prefix('=') {
            (Some(VersionOp::Equal { wildcard: false }), rest)
        } else if let Some(rest) = s.strip_prefix('~') {
            (Some(VersionOp::EqualExceptRevision), rest)
        } else {
            (None, s)
        };

        let (rest, slot) = match rest.split_once(':') {
            Some((head, slot)) if !slot.is_empty() => (head, Some(slot.to_owned())),
            Some(_) => return Err(err(original, "empty slot")),
            None => (rest, None),
        };

        let (category, name_ver) = rest
            .split_once('/')
            .ok_or_else(|| err(original, "missing category separator"))?;
        if category.is_empty() || name_ver.is_empty() {
            return Err(err(original, "empty category or name"));
        }
        if name_ver.contains('/') {
            return Err(err(original, "more than one category separator"));
        }

        let (mut op, name, version) = match op {
            // Without an operator a trailing `*` is a name glob, not a
            // version wildcard.
            None => (None, name_ver.to_owned(), None),
            Some(op) => {
                let (name, ver) = split_name_version(name_ver.trim_end_matches('*'))
                    .ok_or_else(|| err(original, "operator requires a version"))?;
                let version = Version::parse(ver, true)
                    .map_err(|e| err(original, e.to_string()))?;
                if name_ver.ends_with('*') && !matches!(op, VersionOp::Equal { .. }) {
                    return Err(err(original, "version wildcard requires `=`"));
                }
                (Some(op), name.to_owned(), Some(version))
            }
        };
        if op.is_some() && name_ver.ends_with('*') {
            op = Some(VersionOp::Equal { wildcard: true });
        }

        Ok(DepAtom {
            category: category.to_owned(),
            name,
            op,
            version,
            slot,
        })
    }
}

impl Display for DepAtom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(op) = &self.op {
            write!(f, "{}", op)?;
        }
        write!(f, "{}/{}", self.category, self.name)?;
        if let Some(version) = &self.version {
            write!(f, "-{}", version)?;
            if let Some(VersionOp::Equal { wildcard: true }) = self.op {
                write!(f, "*")?;
            }
        }
        if let Some(slot) = &self.slot {
            write!(f, ":{}", slot)?;
        }
        Ok(())
    }
}

fn glob_eq(pattern: &str, value: &str) -> bool {
    if pattern.contains('*') || pattern.contains('?') || pattern.contains('[') {
        glob::Pattern::new(pattern).is_ok_and(|p| p.matches(value))
    } else {
        pattern == value
    }
}

impl DepAtom {
    pub fn has_wildcard_name(&self) -> bool {
        let special = |s: &str| s.contains('*') || s.contains('?') || s.contains('[');
        special(&self.category) || special(&self.name)
    }

    /// Whether the atom constrains this (category, name) pair at all.
    pub fn matches_package(&self, category: &str, name: &str) -> bool {
        glob_eq(&self.category, category) && glob_eq(&self.name, name)
    }

    /// Whether a concrete (version, slot) pair satisfies the constraint.
    pub fn matches_version(&self, version: &Version, slot: &str) -> bool {
        if let Some(want) = &self.slot {
            let main = slot.split('/').next().unwrap_or(slot);
            if want != slot && want != main {
                return false;
            }
        }
        let (op, want) = match (&self.op, &self.version) {
            (Some(op), Some(want)) => (op, want),
            _ => return true,
        };
        match op {
            VersionOp::Less => version < want,
            VersionOp::LessOrEqual => version <= want,
            VersionOp::Greater => version > want,
            VersionOp::GreaterOrEqual => version >= want,
            VersionOp::EqualExceptRevision => version.tilde_cmp(want).is_eq(),
            VersionOp::Equal { wildcard: false } => version == want,
            VersionOp::Equal { wildcard: true } => {
                let full = version.full();
                let prefix = want.full();
                match full.strip_prefix(prefix.as_str()) {
                    // Wildcard matches must end at a component boundary.
                    Some(tail) => !tail.starts_with(|c: char| c.is_ascii_alphanumeric()),
                    None => false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom(s: &str) -> DepAtom {
        s.parse().unwrap()
    }

    fn ver(s: &str) -> Version {
        Version::parse(s, true).unwrap()
    }

    #[test]
    fn test_parse_display_roundtrip() {
        for s in [
            "app-editors/vim",
            "=app-editors/vim-9.0.1",
            "=app-editors/vim-9*",
            ">=dev-lang/rust-1.60",
            "<dev-lang/rust-2",
            "~sys-apps/portage-3.0.30",
            "app-editors/vim:0",
            ">=dev-lang/rust-1.60:stable",
        ] {
            assert_eq!(atom(s).to_string(), s, "round trip of {s}");
        }
    }

    #[test]
    fn test_parse_invalid() {
        for s in [
            "novalidcategory",
            "=app-editors/vim",
            "a/b/c",
            "app-editors/vim:",
            ">=app-editors/vim-1*",
        ] {
            assert!(DepAtom::from_str(s).is_err(), "should reject {s}");
        }
    }

    #[test]
    fn test_package_match_with_wildcards() {
        let a = atom("app-*/vim");
        assert!(a.matches_package("app-editors", "vim"));
        assert!(!a.matches_package("dev-lang", "vim"));
        assert!(atom("*/*").matches_package("x", "y"));
        assert!(!atom("app-editors/vim").matches_package("app-editors", "gvim"));
    }

    #[test]
    fn test_version_ranges() {
        let a = atom(">=app-editors/vim-8.2");
        assert!(a.matches_version(&ver("8.2"), "0"));
        assert!(a.matches_version(&ver("9.0"), "0"));
        assert!(!a.matches_version(&ver("8.1"), "0"));

        let tilde = atom("~app-editors/vim-8.2");
        assert!(tilde.matches_version(&ver("8.2-r3"), "0"));
        assert!(!tilde.matches_version(&ver("8.2.1"), "0"));
    }

    #[test]
    fn test_version_wildcard_boundary() {
        let a = atom("=app-editors/vim-9*");
        assert!(a.matches_version(&ver("9"), "0"));
        assert!(a.matches_version(&ver("9.0.1"), "0"));
        assert!(!a.matches_version(&ver("90"), "0"));
        assert!(!a.matches_version(&ver("9a"), "0"));
    }

    #[test]
    fn test_slot_match() {
        let a = atom("app-editors/vim:1");
        assert!(a.matches_version(&ver("1.0"), "1"));
        assert!(a.matches_version(&ver("1.0"), "1/2"));
        assert!(!a.matches_version(&ver("1.0"), "2"));
    }
}
