// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Shared test fixtures: laying out configuration roots and ports trees
//! under a temporary directory, and the overlay table most cache and
//! database tests run against.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::database::header::{DbHeader, OverlayIdent};

/// Lays out `(relative path, content)` pairs under `root`.
///
/// Intermediate directories are created as needed, so a whole fixture tree
/// (make.conf, profiles, cache directories) can be described in one slice.
pub fn write_files<'a>(root: &Path, files: impl AsRef<[(&'a str, &'a str)]>) -> Result<()> {
    for (rel_path, content) in files.as_ref() {
        let path = root.join(rel_path);
        let parent = path.parent().context("fixture path has no parent")?;
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
        fs::write(&path, content)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}

/// The canonical two-tree layout for codec and ingest tests: the primary
/// tree at key 0 and one labeled overlay at key 1.
pub fn sample_header() -> DbHeader {
    DbHeader::new(vec![
        OverlayIdent::new("/usr/portage/", "gentoo", 0),
        OverlayIdent::new("/var/lib/overlays/guru", "guru", 1),
    ])
}
