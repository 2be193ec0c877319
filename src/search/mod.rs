// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The query core: per-package tests, the boolean match tree compiled from
//! the reverse-Polish command line, and the string algorithms they share.

pub mod algorithms;
pub mod matchtree;
pub mod packagetest;

use thiserror::Error;

use crate::config::PortageSettings;
use crate::database::header::DbHeader;
use crate::rc::RcMap;
use crate::vardb::VarDb;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid pattern {pattern:?}: {reason}")]
    BadPattern { pattern: String, reason: String },
    #[error("unbalanced parentheses in query")]
    UnbalancedParens,
    #[error("dangling logical operator in query")]
    DanglingOperator,
    #[error("unknown query token {0:?}")]
    UnknownToken(String),
}

/// Everything a test needs to evaluate a package. Built once per query run.
pub struct EvalContext<'a> {
    pub settings: &'a PortageSettings,
    pub vardb: &'a VarDb,
    pub rc: &'a RcMap,
    pub header: &'a DbHeader,
}
