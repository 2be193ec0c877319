// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Streaming reader over the binary cache with lazy attribute fetch.
//!
//! [`PackageReader::next`] positions the reader on the next package;
//! [`PackageReader::read`] raises the fetched level to the requested stage.
//! Attributes that were not fetched are skipped in one seek when advancing.

use std::io::{Read, Seek, SeekFrom};

use crate::cache::CacheError;
use crate::data::{ExtendedVersion, Package};
use crate::database::header::DbHeader;
use crate::database::io::{
    read_bitset, read_string, read_string_list, read_varint, DecodeError,
};
use crate::flags::{PropertiesFlags, RestrictFlags};
use crate::version::{Part, PartKind, Version};

/// How much of the current package has been decoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum FetchStage {
    None,
    Name,
    Versions,
    All,
}

pub struct PackageReader<R: Read + Seek> {
    input: R,
    categories_left: u32,
    packages_left: u32,
    category: String,
    /// Absolute offset just past the current package blob.
    blob_end: u64,
    stage: FetchStage,
    package: Package,
}

fn read_version(r: &mut impl Read) -> Result<ExtendedVersion, DecodeError> {
    let num_parts = read_varint(r)? as usize;
    let mut parts = Vec::with_capacity(num_parts.min(32));
    for _ in 0..num_parts {
        let mut tag = [0u8; 1];
        r.read_exact(&mut tag).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                DecodeError::UnexpectedEof
            } else {
                DecodeError::Io(e)
            }
        })?;
        let kind = PartKind::from_tag(tag[0]).ok_or(DecodeError::BadPartTag(tag[0]))?;
        let payload = read_string(r)?;
        parts.push(Part::new(kind, payload));
    }
    let mut version = ExtendedVersion::new(Version::from_parts(parts));
    version.full_keywords = read_string(r)?;
    version.slot = read_string(r)?;
    version.iuse = read_string_list(r)?;
    version.restrict = RestrictFlags::from_bits_truncate(read_bitset(r)?);
    version.properties = PropertiesFlags::from_bits_truncate(read_bitset(r)?);
    version.overlay_key = read_varint(r)? as u32;
    version.depend = read_string(r)?;
    version.rdepend = read_string(r)?;
    version.pdepend = read_string(r)?;
    Ok(version)
}

impl<R: Read + Seek> PackageReader<R> {
    /// Starts streaming after `header` has been read from `input`.
    pub fn new(input: R, header: &DbHeader) -> Self {
        Self {
            input,
            categories_left: header.num_categories,
            packages_left: 0,
            category: String::new(),
            blob_end: 0,
            stage: FetchStage::None,
            package: Package::default(),
        }
    }

    /// Advances to the next package, skipping whatever remained unread of
    /// the current one. Returns false at the end of the stream.
    pub fn next(&mut self) -> Result<bool, CacheError> {
        if self.blob_end != 0 {
            self.input.seek(SeekFrom::Start(self.blob_end))?;
        }
        while self.packages_left == 0 {
            if self.categories_left == 0 {
                return Ok(false);
            }
            self.categories_left -= 1;
            self.category = read_string(&mut self.input)?;
            self.packages_left = read_varint(&mut self.input)? as u32;
        }
        self.packages_left -= 1;
        let blob_len = read_varint(&mut self.input)?;
        let blob_start = self.input.stream_position().map_err(DecodeError::Io)?;
        self.blob_end = blob_start + blob_len;
        self.stage = FetchStage::None;
        self.package = Package {
            category: self.category.clone(),
            ..Package::default()
        };
        Ok(true)
    }

    /// Raises the fetched level to at least `stage`.
    pub fn read(&mut self, stage: FetchStage) -> Result<(), CacheError> {
        while self.stage < stage {
            match self.stage {
                FetchStage::None => {
                    self.package.name = read_string(&mut self.input)?;
                    self.stage = FetchStage::Name;
                }
                FetchStage::Name => {
                    let count = read_varint(&mut self.input)? as usize;
                    for _ in 0..count {
                        let version = read_version(&mut self.input)?;
                        self.package.add_version(version);
                    }
                    self.stage = FetchStage::Versions;
                }
                FetchStage::Versions => {
                    self.package.description = read_string(&mut self.input)?;
                    self.package.homepage = read_string(&mut self.input)?;
                    self.package.licenses = read_string(&mut self.input)?;
                    self.package.provide = read_string(&mut self.input)?;
                    let coll_iuse = read_string_list(&mut self.input)?;
                    self.package.coll_iuse = coll_iuse.into_iter().collect();
                    self.stage = FetchStage::All;
                }
                FetchStage::All => unreachable!(),
            }
        }
        Ok(())
    }

    /// Forgets unread attributes of the current package; the next call to
    /// [`PackageReader::next`] seeks past them.
    pub fn skip(&mut self) {
        self.stage = FetchStage::All;
    }

    /// The partially populated package, valid up to the fetched stage.
    pub fn get(&self) -> &Package {
        &self.package
    }

    pub fn take(&mut self) -> Package {
        std::mem::take(&mut self.package)
    }

    pub fn category(&self) -> &str {
        &self.category
    }
}
