// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! portdex builds a compact binary index of all packages and versions found
//! across a ports tree and its overlays, and answers fast composable
//! queries against it with stability, masking, installed-state and
//! obsolescence annotations applied.

pub mod atom;
pub mod cache;
pub mod config;
pub mod data;
pub mod database;
pub mod flags;
pub mod mask;
pub mod rc;
pub mod search;
pub mod vardb;
pub mod version;

#[cfg(test)]
pub(crate) mod testutil;

/// Non-fatal diagnostics sink. Keeps the core free of any particular I/O
/// sink; the binary routes this into its log output.
pub type ErrorCallback<'a> = &'a dyn Fn(&str);
