// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Parsing and ordering of Portage-style version strings.
//!
//! A version is a sequence of typed parts: the leading numeric component,
//! further dotted numeric components, an optional single-letter suffix,
//! `_alpha`/`_beta`/`_pre`/`_rc`/`_p` suffixes and a `-rN` revision. Parts
//! keep their payload verbatim so that rendering a parsed version reproduces
//! the input exactly.

use std::cmp::Ordering;
use std::fmt::{self, Display, Write};
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid version {version:?}: unparsable text at offset {offset}")]
pub struct VersionParseError {
    pub version: String,
    pub offset: usize,
}

/// The kind of a single version part.
///
/// Variant order is not the comparison order; see [`PartKind::rank`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartKind {
    /// Leading numeric component. Compares purely numerically.
    First,
    /// A dotted numeric component after the first. Subject to the
    /// leading-zero fraction rule.
    Primary,
    /// Single lowercase letter directly after the numeric components.
    Character,
    /// `_alpha`, `_beta`, `_pre`, `_rc`, `_p` payloads.
    Alpha,
    Beta,
    Pre,
    Rc,
    Patch,
    /// `-rN`.
    Revision,
    /// Dotted components of the revision (`-r1.2`).
    InterRevision,
    /// Unparsable trailing text kept when parsing is non-fatal.
    Garbage,
}

impl PartKind {
    /// Total order of part kinds during comparison. `Primary` and
    /// `Character` share a rank; their payloads are compared lexically.
    fn rank(self) -> u8 {
        match self {
            PartKind::Garbage => 0,
            PartKind::First => 1,
            PartKind::Alpha => 2,
            PartKind::Beta => 3,
            PartKind::Pre => 4,
            PartKind::Rc => 5,
            PartKind::Primary | PartKind::Character => 6,
            PartKind::Patch => 7,
            PartKind::Revision => 8,
            PartKind::InterRevision => 9,
        }
    }

    /// Stable on-disk tag for the binary cache.
    pub fn to_tag(self) -> u8 {
        match self {
            PartKind::First => 0,
            PartKind::Primary => 1,
            PartKind::Character => 2,
            PartKind::Alpha => 3,
            PartKind::Beta => 4,
            PartKind::Pre => 5,
            PartKind::Rc => 6,
            PartKind::Patch => 7,
            PartKind::Revision => 8,
            PartKind::InterRevision => 9,
            PartKind::Garbage => 10,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => PartKind::First,
            1 => PartKind::Primary,
            2 => PartKind::Character,
            3 => PartKind::Alpha,
            4 => PartKind::Beta,
            5 => PartKind::Pre,
            6 => PartKind::Rc,
            7 => PartKind::Patch,
            8 => PartKind::Revision,
            9 => PartKind::InterRevision,
            10 => PartKind::Garbage,
            _ => return None,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Part {
    pub kind: PartKind,
    pub payload: String,
}

impl Part {
    pub fn new(kind: PartKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }
}

/// A parsed version string.
#[derive(Clone, Debug)]
pub struct Version {
    parts: Vec<Part>,
}

fn digit_run(s: &str) -> usize {
    s.bytes().take_while(|b| b.is_ascii_digit()).count()
}

impl Version {
    /// Parses a version string.
    ///
    /// With `garbage_fatal`, any unrecognized trailing text is an error.
    /// Otherwise it is kept as a single trailing garbage part and ordering
    /// degrades gracefully (garbage sorts below every regular part).
    pub fn parse(s: &str, garbage_fatal: bool) -> Result<Self, VersionParseError> {
        let mut parts = Vec::new();
        let mut rest = s;
        let mut offset = 0;

        let eat = |rest: &mut &str, offset: &mut usize, n: usize| {
            let current = *rest;
            *rest = &current[n..];
            *offset += n;
        };

        let lead = digit_run(rest);
        if lead > 0 {
            parts.push(Part::new(PartKind::First, &rest[..lead]));
            eat(&mut rest, &mut offset, lead);

            // Dotted numeric components.
            while let Some(tail) = rest.strip_prefix('.') {
                let n = digit_run(tail);
                if n == 0 {
                    break;
                }
                parts.push(Part::new(PartKind::Primary, &tail[..n]));
                eat(&mut rest, &mut offset, n + 1);
            }

            // A single letter suffix, only when it is not the start of a word.
            let mut chars = rest.chars();
            if let Some(c) = chars.next() {
                let next_is_word = chars.next().is_some_and(|n| n.is_ascii_alphanumeric());
                if c.is_ascii_lowercase() && !next_is_word {
                    parts.push(Part::new(PartKind::Character, c));
                    eat(&mut rest, &mut offset, 1);
                }
            }

            // `_alpha`, `_beta`, `_pre`, `_rc`, `_p`, each optionally numbered.
            const SUFFIXES: &[(&str, PartKind)] = &[
                ("alpha", PartKind::Alpha),
                ("beta", PartKind::Beta),
                ("pre", PartKind::Pre),
                ("rc", PartKind::Rc),
                ("p", PartKind::Patch),
            ];
            'suffixes: while let Some(tail) = rest.strip_prefix('_') {
                for (word, kind) in SUFFIXES {
                    if let Some(after) = tail.strip_prefix(word) {
                        let n = digit_run(after);
                        parts.push(Part::new(*kind, &after[..n]));
                        eat(&mut rest, &mut offset, 1 + word.len() + n);
                        continue 'suffixes;
                    }
                }
                break;
            }

            // `-rN` revision, with optional dotted inter-revision components.
            if let Some(tail) = rest.strip_prefix("-r") {
                let n = digit_run(tail);
                if n > 0 {
                    parts.push(Part::new(PartKind::Revision, &tail[..n]));
                    eat(&mut rest, &mut offset, 2 + n);
                    while let Some(tail) = rest.strip_prefix('.') {
                        let n = digit_run(tail);
                        if n == 0 {
                            break;
                        }
                        parts.push(Part::new(PartKind::InterRevision, &tail[..n]));
                        eat(&mut rest, &mut offset, n + 1);
                    }
                }
            }
        }

        if !rest.is_empty() {
            if garbage_fatal {
                return Err(VersionParseError {
                    version: s.to_owned(),
                    offset,
                });
            }
            parts.push(Part::new(PartKind::Garbage, rest));
        }

        Ok(Self { parts })
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn from_parts(parts: Vec<Part>) -> Self {
        Self { parts }
    }

    /// Renders the full version string, revision included.
    pub fn full(&self) -> String {
        let mut out = String::new();
        let mut seen_revision = false;
        for part in &self.parts {
            match part.kind {
                PartKind::First | PartKind::Garbage => out.push_str(&part.payload),
                PartKind::Primary => {
                    let _ = write!(out, ".{}", part.payload);
                }
                PartKind::Character => out.push_str(&part.payload),
                PartKind::Alpha => {
                    let _ = write!(out, "_alpha{}", part.payload);
                }
                PartKind::Beta => {
                    let _ = write!(out, "_beta{}", part.payload);
                }
                PartKind::Pre => {
                    let _ = write!(out, "_pre{}", part.payload);
                }
                PartKind::Rc => {
                    let _ = write!(out, "_rc{}", part.payload);
                }
                PartKind::Patch => {
                    let _ = write!(out, "_p{}", part.payload);
                }
                PartKind::Revision => {
                    seen_revision = true;
                    let _ = write!(out, "-r{}", part.payload);
                }
                PartKind::InterRevision => {
                    debug_assert!(seen_revision);
                    let _ = write!(out, ".{}", part.payload);
                }
            }
        }
        out
    }

    /// Renders the version without its revision.
    pub fn plain(&self) -> String {
        Version {
            parts: self
                .parts
                .iter()
                .filter(|p| !matches!(p.kind, PartKind::Revision | PartKind::InterRevision))
                .cloned()
                .collect(),
        }
        .full()
    }

    /// The `rN[.M...]` revision string, or an empty string.
    pub fn revision(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part.kind {
                PartKind::Revision => {
                    let _ = write!(out, "r{}", part.payload);
                }
                PartKind::InterRevision => {
                    let _ = write!(out, ".{}", part.payload);
                }
                _ => {}
            }
        }
        out
    }

    /// Compares ignoring revision parts.
    pub fn tilde_cmp(&self, other: &Self) -> Ordering {
        let strip = |v: &Version| -> Vec<Part> {
            v.parts
                .iter()
                .filter(|p| !matches!(p.kind, PartKind::Revision | PartKind::InterRevision))
                .cloned()
                .collect()
        };
        cmp_parts(&strip(self), &strip(other))
    }
}

impl Default for Version {
    /// The empty version; sorts below any parsed version.
    fn default() -> Self {
        Version { parts: Vec::new() }
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s, true)
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full())
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_parts(&self.parts, &other.parts)
    }
}

/// Compares two digit strings as unsigned integers of arbitrary size.
fn cmp_numeric(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Compares two `Primary` payloads. A component with a leading zero is
/// compared as a fixed-point fraction: trailing zeros are stripped and the
/// remainders compared as strings, so `01 < 1` and `02 < 2` while `1 < 10`.
fn cmp_primary(a: &str, b: &str) -> Ordering {
    if a.starts_with('0') || b.starts_with('0') {
        a.trim_end_matches('0').cmp(b.trim_end_matches('0'))
    } else {
        cmp_numeric(a, b)
    }
}

fn cmp_payload(kind: PartKind, a: &str, b: &str) -> Ordering {
    match kind {
        PartKind::Character | PartKind::Garbage => a.cmp(b),
        PartKind::Primary => cmp_primary(a, b),
        _ => cmp_numeric(a, b),
    }
}

/// Compares one remaining part against an exhausted other side.
///
/// The missing side acts as an implicit zero `Primary` part, except against
/// revision parts where the implicit zero is of the same kind; this yields
/// `1 == 1.0 == 1.0-r0` while `1.0_alpha1 < 1.0 < 1.0_p0`.
fn cmp_part_vs_missing(part: &Part) -> Ordering {
    match part.kind {
        PartKind::Garbage
        | PartKind::Alpha
        | PartKind::Beta
        | PartKind::Pre
        | PartKind::Rc => Ordering::Less,
        PartKind::Patch | PartKind::Character => Ordering::Greater,
        PartKind::First | PartKind::Primary => cmp_primary(&part.payload, ""),
        PartKind::Revision | PartKind::InterRevision => cmp_numeric(&part.payload, ""),
    }
}

fn cmp_parts(a: &[Part], b: &[Part]) -> Ordering {
    let mut i = 0;
    loop {
        match (a.get(i), b.get(i)) {
            (None, None) => return Ordering::Equal,
            (Some(x), None) => {
                let o = cmp_part_vs_missing(x);
                if o != Ordering::Equal {
                    return o;
                }
            }
            (None, Some(y)) => {
                let o = cmp_part_vs_missing(y).reverse();
                if o != Ordering::Equal {
                    return o;
                }
            }
            (Some(x), Some(y)) => {
                let by_rank = x.kind.rank().cmp(&y.kind.rank());
                if by_rank != Ordering::Equal {
                    return by_rank;
                }
                // Equal rank with different kinds only happens for
                // Primary/Character. A nonzero numeric component outranks a
                // letter; a zero component loses to it.
                let o = match (x.kind, y.kind) {
                    (PartKind::Primary, PartKind::Character) => {
                        match cmp_primary(&x.payload, "") {
                            Ordering::Equal => Ordering::Less,
                            o => o,
                        }
                    }
                    (PartKind::Character, PartKind::Primary) => {
                        match cmp_primary(&y.payload, "") {
                            Ordering::Equal => Ordering::Greater,
                            o => o.reverse(),
                        }
                    }
                    _ => cmp_payload(x.kind, &x.payload, &y.payload),
                };
                if o != Ordering::Equal {
                    return o;
                }
            }
        }
        i += 1;
    }
}

/// Splits a `name-version` file stem into its name and version halves.
///
/// The split point is the last hyphen that is followed by a digit and starts
/// a fully valid version string.
pub fn split_name_version(stem: &str) -> Option<(&str, &str)> {
    let bytes = stem.as_bytes();
    for (i, _) in stem
        .char_indices()
        .rev()
        .filter(|&(i, c)| c == '-' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit))
    {
        if i == 0 {
            return None;
        }
        let candidate = &stem[i + 1..];
        if Version::parse(candidate, true).is_ok() {
            return Some((&stem[..i], candidate));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s, true).unwrap()
    }

    #[test]
    fn test_parse_roundtrip() {
        for s in [
            "1",
            "1.2.3",
            "1.2.3b",
            "2.0_alpha",
            "2.0_alpha3",
            "1.0_beta2_p7",
            "4.1_pre1",
            "3_rc4",
            "1.2.3b_alpha4-r5",
            "9999",
            "1.0-r2",
            "1.0-r2.1",
            "1.0.01",
        ] {
            assert_eq!(v(s).full(), s, "round trip of {s}");
        }
    }

    #[test]
    fn test_parse_garbage() {
        assert!(Version::parse("1.0foo", true).is_err());
        assert!(Version::parse("", true).is_err());
        let lenient = Version::parse("1.0foo", false).unwrap();
        assert_eq!(lenient.full(), "1.0foo");
        assert_eq!(
            lenient.parts().last().unwrap().kind,
            PartKind::Garbage
        );
    }

    #[test]
    fn test_implicit_zero_equalities() {
        assert_eq!(v("1"), v("1.0"));
        assert_eq!(v("1"), v("1.0-r0"));
        assert_eq!(v("1.0"), v("1.0-r0"));
        assert_eq!(v("1.0_alpha"), v("1.0_alpha0"));
    }

    #[test]
    fn test_ordering_table() {
        let ordered = [
            "1.0_alpha",
            "1.0_alpha1",
            "1.0_beta",
            "1.0_pre1",
            "1.0_rc1",
            "1.0",
            "1.0a",
            "1.0.1",
            "1.0_p1",
            "1.0-r1",
            "1.1",
            "1.2",
            "1.10",
            "2.0",
        ];
        for pair in ordered.windows(2) {
            assert!(
                v(pair[0]) < v(pair[1]),
                "{} should sort before {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_fraction_rule() {
        assert!(v("1.0.01") < v("1.0.1"));
        assert!(v("1.02") < v("1.2"));
        assert!(v("1.2") < v("1.10"));
        assert!(v("1.01") < v("1.1"));
    }

    #[test]
    fn test_compare_is_antisymmetric() {
        let samples = [
            "1", "1.0", "1.0a", "1.0_alpha", "1.0_p1", "1.0-r1", "2.3.4", "1.0.01", "1.0.1",
        ];
        for a in samples {
            for b in samples {
                assert_eq!(
                    v(a).cmp(&v(b)),
                    v(b).cmp(&v(a)).reverse(),
                    "compare({a}, {b})"
                );
            }
        }
    }

    #[test]
    fn test_tilde_compare_ignores_revision() {
        assert_eq!(v("1.2-r3").tilde_cmp(&v("1.2")), Ordering::Equal);
        assert_eq!(v("1.2-r3").tilde_cmp(&v("1.2-r7")), Ordering::Equal);
        assert_eq!(v("1.2-r3").tilde_cmp(&v("1.3")), Ordering::Less);
    }

    #[test]
    fn test_garbage_sorts_low() {
        let g = Version::parse("1.0xyz", false).unwrap();
        assert!(g < v("1.0"));
        assert!(g < v("1.0_alpha"));
    }

    #[test]
    fn test_split_name_version() {
        assert_eq!(split_name_version("foo-1.0"), Some(("foo", "1.0")));
        assert_eq!(split_name_version("foo-bar-1.0-r1"), Some(("foo-bar", "1.0-r1")));
        assert_eq!(split_name_version("gcc-10-bin-4.5"), Some(("gcc-10-bin", "4.5")));
        assert_eq!(split_name_version("noversion"), None);
        assert_eq!(split_name_version("trailing-"), None);
        // The last hyphen-digit run that parses wins.
        assert_eq!(split_name_version("a-1-2"), Some(("a-1", "2")));
    }

    #[test]
    fn test_revision_accessors() {
        let x = v("1.2.3b_alpha4-r5");
        assert_eq!(x.plain(), "1.2.3b_alpha4");
        assert_eq!(x.revision(), "r5");
        assert_eq!(v("1.0").revision(), "");
    }
}
