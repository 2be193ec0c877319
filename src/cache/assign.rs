// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Reader for the assign cache format (`KEY=value` lines), which also
//! covers the md5-cache layout. The `_md5_` key, when present, is the md5
//! checksum of the originating ebuild and can be verified against it.

use std::fs::{read_to_string, File};
use std::path::Path;

use anyhow::{Context, Result};
use md5::{Digest, Md5};

use crate::cache::EbuildInfo;

pub fn read_assign_file(path: &Path) -> Result<EbuildInfo> {
    let content = read_to_string(path)
        .with_context(|| format!("Failed to read assign cache file {}", path.display()))?;
    let mut info = EbuildInfo::default();
    for line in content.split('\n') {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key {
            "KEYWORDS" => info.keywords = value.to_owned(),
            "SLOT" => info.slot = value.to_owned(),
            "IUSE" => info.iuse = value.to_owned(),
            "RESTRICT" => info.restrict = value.to_owned(),
            "PROPERTIES" => info.properties = value.to_owned(),
            "DEPEND" => info.depend = value.to_owned(),
            "RDEPEND" => info.rdepend = value.to_owned(),
            "PDEPEND" => info.pdepend = value.to_owned(),
            "DESCRIPTION" => info.description = value.to_owned(),
            "HOMEPAGE" => info.homepage = value.to_owned(),
            "LICENSE" => info.license = value.to_owned(),
            "PROVIDE" => info.provide = value.to_owned(),
            "_md5_" => info.md5 = Some(value.to_owned()),
            _ => {}
        }
    }
    Ok(info)
}

/// Computes the md5 checksum of a file in hexadecimal.
pub fn md5_of_file(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Md5::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Checks a cache entry's `_md5_` against the ebuild it was generated from.
/// Entries without a checksum pass.
pub fn verify_md5(info: &EbuildInfo, ebuild_path: &Path) -> Result<bool> {
    match &info.md5 {
        None => Ok(true),
        Some(want) => Ok(md5_of_file(ebuild_path)? == want.to_ascii_lowercase()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::write_files;

    #[test]
    fn test_read_assign_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let dir = dir.as_ref();
        write_files(
            dir,
            [(
                "vim-9.0",
                "DEFINED_PHASES=compile install\nDESCRIPTION=An editor\nKEYWORDS=amd64 ~arm\nSLOT=0\nIUSE=acl x\nLICENSE=vim\nRESTRICT=test\n_md5_=d41d8cd98f00b204e9800998ecf8427e\n",
            )],
        )?;

        let info = read_assign_file(&dir.join("vim-9.0"))?;
        assert_eq!(info.description, "An editor");
        assert_eq!(info.keywords, "amd64 ~arm");
        assert_eq!(info.slot, "0");
        assert_eq!(info.iuse, "acl x");
        assert_eq!(info.license, "vim");
        assert_eq!(info.restrict, "test");
        assert_eq!(info.md5.as_deref(), Some("d41d8cd98f00b204e9800998ecf8427e"));
        Ok(())
    }

    #[test]
    fn test_verify_md5() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let dir = dir.as_ref();
        write_files(dir, [("vim-9.0.ebuild", "")])?;
        let ebuild = dir.join("vim-9.0.ebuild");

        // md5 of the empty file.
        let mut info = EbuildInfo {
            md5: Some("d41d8cd98f00b204e9800998ecf8427e".to_owned()),
            ..EbuildInfo::default()
        };
        assert!(verify_md5(&info, &ebuild)?);

        info.md5 = Some("0000000000000000000000000000000".to_owned());
        assert!(!verify_md5(&info, &ebuild)?);

        info.md5 = None;
        assert!(verify_md5(&info, &ebuild)?);
        Ok(())
    }
}
