// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The cache file header: magic, format version, overlay table and category
//! count. Overlay references in user input are resolved against the table by
//! index, label or path.

use std::io::{Read, Write};

use crate::database::io::{read_string, read_varint, write_string, write_varint, DecodeError};

pub const MAGIC: &[u8; 4] = b"pdx\n";

/// Current binary format version. Bump on any layout change.
pub const FORMAT_VERSION: u32 = 2;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OverlayIdent {
    pub path: String,
    pub label: String,
    pub priority: i32,
}

impl OverlayIdent {
    pub fn new(path: &str, label: &str, priority: i32) -> Self {
        Self {
            path: path.to_owned(),
            label: label.to_owned(),
            priority,
        }
    }
}

/// How liberally to match overlay references.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverlayTest {
    /// Label or numeric index only.
    Label,
    /// Label, numeric index or exact path.
    Path,
    /// Label, numeric index, exact path, or a path suffix after `/`.
    AllPath,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DbHeader {
    pub format_version: u32,
    /// Overlay table; index 0 is the primary tree.
    pub overlays: Vec<OverlayIdent>,
    pub num_categories: u32,
    pub num_packages: u32,
}

fn trim_slash(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

impl DbHeader {
    pub fn new(overlays: Vec<OverlayIdent>) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            overlays,
            num_categories: 0,
            num_packages: 0,
        }
    }

    pub fn write(&self, w: &mut impl Write) -> std::io::Result<()> {
        w.write_all(MAGIC)?;
        w.write_all(&self.format_version.to_be_bytes())?;
        write_varint(w, self.overlays.len() as u64)?;
        for overlay in &self.overlays {
            write_string(w, &overlay.path)?;
            write_string(w, &overlay.label)?;
            write_varint(w, overlay.priority as u32 as u64)?;
        }
        write_varint(w, self.num_categories as u64)?;
        write_varint(w, self.num_packages as u64)?;
        Ok(())
    }

    pub fn read(r: &mut impl Read) -> Result<Self, DecodeError> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                DecodeError::UnexpectedEof
            } else {
                DecodeError::Io(e)
            }
        })?;
        if &magic != MAGIC {
            return Err(DecodeError::BadMagic);
        }
        let mut version = [0u8; 4];
        r.read_exact(&mut version)?;
        let format_version = u32::from_be_bytes(version);

        let num_overlays = read_varint(r)? as usize;
        let mut overlays = Vec::with_capacity(num_overlays.min(256));
        for _ in 0..num_overlays {
            let path = read_string(r)?;
            let label = read_string(r)?;
            let priority = read_varint(r)? as u32 as i32;
            overlays.push(OverlayIdent {
                path,
                label,
                priority,
            });
        }
        let num_categories = read_varint(r)? as u32;
        let num_packages = read_varint(r)? as u32;
        Ok(Self {
            format_version,
            overlays,
            num_categories,
            num_packages,
        })
    }

    /// Resolves an overlay reference to its key.
    ///
    /// `pattern` may be a numeric index, a label, or (depending on `mode`) a
    /// path; an empty pattern resolves to the primary tree when `portdir`
    /// names it.
    pub fn find_overlay(
        &self,
        pattern: &str,
        portdir: Option<&str>,
        mode: OverlayTest,
    ) -> Option<u32> {
        if pattern.is_empty() {
            let portdir = trim_slash(portdir?);
            return self
                .overlays
                .iter()
                .position(|o| trim_slash(&o.path) == portdir)
                .map(|i| i as u32);
        }
        if let Ok(index) = pattern.parse::<u32>() {
            if (index as usize) < self.overlays.len() {
                return Some(index);
            }
        }
        if let Some(i) = self.overlays.iter().position(|o| o.label == pattern) {
            return Some(i as u32);
        }
        if mode == OverlayTest::Label {
            return None;
        }
        let pattern_path = trim_slash(pattern);
        if let Some(i) = self
            .overlays
            .iter()
            .position(|o| trim_slash(&o.path) == pattern_path)
        {
            return Some(i as u32);
        }
        if mode == OverlayTest::Path {
            return None;
        }
        if pattern.contains('*') || pattern.contains('?') {
            if let Ok(glob) = glob::Pattern::new(pattern) {
                if let Some(i) = self.overlays.iter().position(|o| glob.matches(&o.label)) {
                    return Some(i as u32);
                }
            }
        }
        self.overlays
            .iter()
            .position(|o| {
                trim_slash(&o.path)
                    .rsplit('/')
                    .next()
                    .is_some_and(|base| base == pattern_path)
            })
            .map(|i| i as u32)
    }

    /// All overlay keys matching a reference; used for overlay filters that
    /// accept several trees.
    pub fn overlay_keys(&self, pattern: &str, portdir: Option<&str>) -> Vec<u32> {
        if pattern.is_empty() {
            // Every non-primary overlay.
            return (0..self.overlays.len() as u32)
                .filter(|&i| {
                    let primary = portdir.map(trim_slash);
                    primary != Some(trim_slash(&self.overlays[i as usize].path))
                })
                .collect();
        }
        match self.find_overlay(pattern, portdir, OverlayTest::AllPath) {
            Some(key) => vec![key],
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn header() -> DbHeader {
        DbHeader::new(vec![
            OverlayIdent::new("/usr/portage/", "gentoo", 0),
            OverlayIdent::new("/var/lib/overlays/guru", "guru", 1),
            OverlayIdent::new("/var/lib/overlays/local", "", 2),
        ])
    }

    #[test]
    fn test_header_roundtrip() {
        let mut h = header();
        h.num_categories = 7;
        h.num_packages = 42;
        let mut buf = Vec::new();
        h.write(&mut buf).unwrap();
        let read = DbHeader::read(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(read, h);
    }

    #[test]
    fn test_bad_magic() {
        assert!(matches!(
            DbHeader::read(&mut Cursor::new(b"nope....")),
            Err(DecodeError::BadMagic)
        ));
    }

    #[test]
    fn test_find_overlay() {
        let h = header();
        assert_eq!(h.find_overlay("gentoo", None, OverlayTest::Label), Some(0));
        assert_eq!(h.find_overlay("1", None, OverlayTest::Label), Some(1));
        assert_eq!(h.find_overlay("guru", None, OverlayTest::Label), Some(1));
        assert_eq!(
            h.find_overlay("/var/lib/overlays/local/", None, OverlayTest::Path),
            Some(2)
        );
        // Path matches need at least Path mode.
        assert_eq!(
            h.find_overlay("/var/lib/overlays/local", None, OverlayTest::Label),
            None
        );
        // Basename fallback needs AllPath.
        assert_eq!(h.find_overlay("local", None, OverlayTest::Path), None);
        assert_eq!(h.find_overlay("local", None, OverlayTest::AllPath), Some(2));
        // Labels may be matched by wildcard.
        assert_eq!(h.find_overlay("gu*", None, OverlayTest::AllPath), Some(1));
        // Empty pattern resolves the primary tree.
        assert_eq!(
            h.find_overlay("", Some("/usr/portage"), OverlayTest::AllPath),
            Some(0)
        );
    }

    #[test]
    fn test_overlay_keys_excludes_primary_for_empty_pattern() {
        let h = header();
        assert_eq!(h.overlay_keys("", Some("/usr/portage")), vec![1, 2]);
        assert_eq!(h.overlay_keys("guru", None), vec![1]);
        assert_eq!(h.overlay_keys("nothere", None), Vec::<u32>::new());
    }
}
