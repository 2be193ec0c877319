// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Reader for the flat cache format: one value per line in a fixed order.

use std::fs::read_to_string;
use std::path::Path;

use anyhow::{Context, Result};

use crate::cache::EbuildInfo;

// 0-based line numbers of the flat cache layout.
const LINE_DEPEND: usize = 0;
const LINE_RDEPEND: usize = 1;
const LINE_SLOT: usize = 2;
const LINE_RESTRICT: usize = 4;
const LINE_HOMEPAGE: usize = 5;
const LINE_LICENSE: usize = 6;
const LINE_DESCRIPTION: usize = 7;
const LINE_KEYWORDS: usize = 8;
const LINE_IUSE: usize = 10;
const LINE_PDEPEND: usize = 12;
const LINE_PROVIDE: usize = 13;
const LINE_PROPERTIES: usize = 15;

pub fn read_flat_file(path: &Path) -> Result<EbuildInfo> {
    let content = read_to_string(path)
        .with_context(|| format!("Failed to read flat cache file {}", path.display()))?;
    let lines: Vec<&str> = content.split('\n').collect();
    let line = |n: usize| lines.get(n).map(|s| s.trim()).unwrap_or("").to_owned();

    Ok(EbuildInfo {
        depend: line(LINE_DEPEND),
        rdepend: line(LINE_RDEPEND),
        slot: line(LINE_SLOT),
        restrict: line(LINE_RESTRICT),
        homepage: line(LINE_HOMEPAGE),
        license: line(LINE_LICENSE),
        description: line(LINE_DESCRIPTION),
        keywords: line(LINE_KEYWORDS),
        iuse: line(LINE_IUSE),
        pdepend: line(LINE_PDEPEND),
        provide: line(LINE_PROVIDE),
        properties: line(LINE_PROPERTIES),
        md5: None,
    })
}
