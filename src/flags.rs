// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Bit-set types attached to versions: keyword classification, mask state,
//! RESTRICT/PROPERTIES and redundancy diagnostics.

use std::collections::BTreeSet;

use bitflags::bitflags;

bitflags! {
    /// Per-version keyword classification.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct KeywordsFlags: u16 {
        /// The version is accepted by the effective accept-keywords.
        const STABLE = 1 << 0;
        /// KEYWORDS contains a plain keyword of the local arch set.
        const ARCHSTABLE = 1 << 1;
        /// KEYWORDS contains `~arch` for an arch of the local arch set.
        const ARCHUNSTABLE = 1 << 2;
        /// KEYWORDS contains a plain keyword outside the local arch set.
        const ALIENSTABLE = 1 << 3;
        /// KEYWORDS contains `~other` outside the local arch set.
        const ALIENUNSTABLE = 1 << 4;
        /// KEYWORDS rejects an arch of the local arch set (`-arch`).
        const MINUSKEYWORD = 1 << 5;
        /// KEYWORDS contains `-~*`.
        const MINUSUNSTABLE = 1 << 6;
        /// KEYWORDS contains `-*`.
        const MINUSASTERISK = 1 << 7;
        /// KEYWORDS contains any plain keyword at all.
        const SOMESTABLE = 1 << 8;
        /// KEYWORDS contains any `~`-prefixed keyword (matches `~*`).
        const TILDESTARMATCH = 1 << 9;
    }
}

bitflags! {
    /// Per-version mask state.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct MaskFlags: u8 {
        const MASKED = 1 << 0;
        const UNMASKED = 1 << 1;
        const SYSTEM = 1 << 2;
        const WORLD = 1 << 3;
        const PROFILE_MASKED = 1 << 4;
    }
}

bitflags! {
    /// RESTRICT tokens of a version.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct RestrictFlags: u32 {
        const FETCH = 1 << 0;
        const MIRROR = 1 << 1;
        const PRIMARYURI = 1 << 2;
        const BINCHECKS = 1 << 3;
        const STRIP = 1 << 4;
        const TEST = 1 << 5;
        const USERPRIV = 1 << 6;
        const INSTALLSOURCES = 1 << 7;
        const BINDIST = 1 << 8;
        const PARALLEL = 1 << 9;
    }
}

bitflags! {
    /// PROPERTIES tokens of a version.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct PropertiesFlags: u32 {
        const INTERACTIVE = 1 << 0;
        const LIVE = 1 << 1;
        const VIRTUAL = 1 << 2;
        const SET = 1 << 3;
    }
}

bitflags! {
    /// Reasons why a user-config entry is redundant or suspicious.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Redundant: u32 {
        const DOUBLE = 1 << 0;
        const DOUBLE_LINE = 1 << 1;
        const MIXED = 1 << 2;
        const WEAKER = 1 << 3;
        const STRANGE = 1 << 4;
        const NO_CHANGE = 1 << 5;
        const MINUSASTERISK = 1 << 6;
        const IN_KEYWORDS = 1 << 7;
        const IN_MASK = 1 << 8;
        const IN_UNMASK = 1 << 9;
        const IN_USE = 1 << 10;
        const IN_ENV = 1 << 11;
        const IN_LICENSE = 1 << 12;
        const IN_CFLAGS = 1 << 13;
        const MASK = 1 << 14;
        const UNMASK = 1 << 15;
        const DOUBLE_MASK = 1 << 16;
        const DOUBLE_UNMASK = 1 << 17;
        const DOUBLE_USE = 1 << 18;
        const DOUBLE_ENV = 1 << 19;
        const DOUBLE_LICENSE = 1 << 20;
        const DOUBLE_CFLAGS = 1 << 21;

        /// Checks that require the keyword-stability computation.
        const ALL_KEYWORDS = Self::DOUBLE.bits()
            | Self::DOUBLE_LINE.bits()
            | Self::MIXED.bits()
            | Self::WEAKER.bits()
            | Self::STRANGE.bits()
            | Self::NO_CHANGE.bits()
            | Self::MINUSASTERISK.bits()
            | Self::IN_KEYWORDS.bits();
        /// Checks that require the mask computation.
        const ALL_MASKS = Self::MASK.bits()
            | Self::UNMASK.bits()
            | Self::DOUBLE_MASK.bits()
            | Self::DOUBLE_UNMASK.bits()
            | Self::IN_MASK.bits()
            | Self::IN_UNMASK.bits();
    }
}

impl RestrictFlags {
    /// Parses a RESTRICT string; unknown and conditional tokens are ignored.
    pub fn parse(s: &str) -> Self {
        let mut flags = Self::empty();
        for token in s.split_whitespace() {
            flags |= match token {
                "fetch" => Self::FETCH,
                "mirror" => Self::MIRROR,
                "primaryuri" => Self::PRIMARYURI,
                "binchecks" => Self::BINCHECKS,
                "strip" => Self::STRIP,
                "test" => Self::TEST,
                "userpriv" => Self::USERPRIV,
                "installsources" => Self::INSTALLSOURCES,
                "bindist" => Self::BINDIST,
                "parallel" => Self::PARALLEL,
                _ => Self::empty(),
            };
        }
        flags
    }
}

impl PropertiesFlags {
    pub fn parse(s: &str) -> Self {
        let mut flags = Self::empty();
        for token in s.split_whitespace() {
            flags |= match token {
                "interactive" => Self::INTERACTIVE,
                "live" => Self::LIVE,
                "virtual" => Self::VIRTUAL,
                "set" => Self::SET,
                _ => Self::empty(),
            };
        }
        flags
    }
}

/// Memoization slot indices for keyword flags on a version.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SavedKey {
    Arch = 0,
    Accept = 1,
    User = 2,
}

/// Memoization slot indices for mask flags on a version.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SavedMask {
    Profile = 0,
    UserProfile = 1,
    File = 2,
    User = 3,
}

/// Classifies the KEYWORDS string of a version against an accept set.
///
/// `arch` is the local arch set used to distinguish arch keywords from alien
/// ones; `accept` is the resolved accept-keywords set deciding `STABLE`.
pub fn classify_keywords(
    keywords: &str,
    accept: &BTreeSet<String>,
    arch: &BTreeSet<String>,
) -> KeywordsFlags {
    let mut flags = KeywordsFlags::empty();
    let tokens: BTreeSet<&str> = keywords.split_whitespace().collect();

    for &k in &tokens {
        if let Some(plain) = k.strip_prefix('~') {
            flags |= KeywordsFlags::TILDESTARMATCH;
            if arch.contains(plain) || arch.contains(k) {
                flags |= KeywordsFlags::ARCHUNSTABLE;
            } else {
                flags |= KeywordsFlags::ALIENUNSTABLE;
            }
        } else if let Some(plain) = k.strip_prefix('-') {
            match plain {
                "*" => flags |= KeywordsFlags::MINUSASTERISK,
                "~*" => flags |= KeywordsFlags::MINUSUNSTABLE,
                _ if arch.contains(plain) => flags |= KeywordsFlags::MINUSKEYWORD,
                _ => {}
            }
        } else {
            flags |= KeywordsFlags::SOMESTABLE;
            if arch.contains(k) {
                flags |= KeywordsFlags::ARCHSTABLE;
            } else {
                flags |= KeywordsFlags::ALIENSTABLE;
            }
        }
    }

    for a in accept {
        let accepted = match a.as_str() {
            "**" => true,
            "*" => flags.contains(KeywordsFlags::SOMESTABLE),
            "~*" => flags.contains(KeywordsFlags::TILDESTARMATCH),
            t if t.starts_with('-') => false,
            t => match t.strip_prefix('~') {
                // `~arch` accepts both `arch` and `~arch` keywords.
                Some(plain) => tokens.contains(t) || tokens.contains(plain),
                None => tokens.contains(t),
            },
        };
        if accepted {
            flags |= KeywordsFlags::STABLE;
            break;
        }
    }

    flags
}
