// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Ingestors reading ebuild metadata layouts into the package tree.
//!
//! All ingestors implement [`CacheIngest`]; the caller decides whether a
//! failed ingest pass is fatal or whether to try another ingestor.

pub mod assign;
pub mod db;
pub mod flat;
pub mod metadata;

use std::collections::BTreeSet;
use std::path::PathBuf;

use thiserror::Error;

use crate::data::PackageTree;
use crate::database::header::FORMAT_VERSION;
use crate::database::io::DecodeError;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cannot open cache file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cache file {} uses {} format {found} (current is {current})",
            path.display(), if found > current { "newer" } else { "obsolete" })]
    VersionMismatch {
        path: PathBuf,
        found: u32,
        current: u32,
    },
    #[error("cache file {} does not contain overlay {overlay}", path.display())]
    MissingOverlay { path: PathBuf, overlay: String },
    #[error("cache file is damaged: {0}")]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CacheError {
    pub fn version_mismatch(path: PathBuf, found: u32) -> Self {
        Self::VersionMismatch {
            path,
            found,
            current: FORMAT_VERSION,
        }
    }
}

/// Which categories an ingest pass populates.
#[derive(Clone, Copy, Debug)]
pub enum CategorySelect<'a> {
    /// Read everything, creating categories as they are discovered.
    All,
    /// Restrict to a known category set.
    Restrict(&'a BTreeSet<String>),
    /// Populate one pre-existing category only.
    Single(&'a str),
}

impl CategorySelect<'_> {
    pub fn wants(&self, category: &str) -> bool {
        match self {
            CategorySelect::All => true,
            CategorySelect::Restrict(set) => set.contains(category),
            CategorySelect::Single(name) => *name == category,
        }
    }
}

pub use crate::ErrorCallback;

pub trait CacheIngest {
    /// A human-readable name identifying the ingestor and its configuration.
    fn describe(&self) -> String;

    fn read_categories(
        &mut self,
        tree: &mut PackageTree,
        select: CategorySelect<'_>,
        errors: ErrorCallback<'_>,
    ) -> Result<(), CacheError>;
}

/// Full metadata of one ebuild as a cache file records it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EbuildInfo {
    pub keywords: String,
    pub slot: String,
    pub iuse: String,
    pub restrict: String,
    pub properties: String,
    pub depend: String,
    pub rdepend: String,
    pub pdepend: String,
    pub homepage: String,
    pub license: String,
    pub description: String,
    pub provide: String,
    /// The `_md5_` checksum where the format carries one.
    pub md5: Option<String>,
}
