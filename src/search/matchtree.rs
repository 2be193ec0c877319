// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Compilation of the reverse-Polish command line into a boolean match
//! tree, including the stdin pipe mode.
//!
//! The compiler keeps at most one test open at a time: the first
//! option/field/algorithm token after a logical operator opens a new test, a
//! pattern token closes it and pushes it into the tree. Logical tokens
//! always flush the open test first.

use std::collections::{BTreeMap, BTreeSet};
use std::io::BufRead;

use crate::data::Package;
use crate::database::header::DbHeader;
use crate::database::reader::FetchStage;
use crate::flags::{PropertiesFlags, RestrictFlags};
use crate::rc::RcMap;
use crate::search::packagetest::{
    AlgorithmChoice, MatchField, PackageTest, StabilityFilter, StabilityKind, StabilityScope,
};
use crate::search::{EvalContext, QueryError};
use crate::version::{split_name_version, Version};

/// The token alphabet fed to the compiler. Producing these from argv is the
/// caller's concern.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryToken {
    And,
    Or,
    Not,
    Open,
    Close,
    /// `|`; the variants force name-only or name-version interpretation.
    Pipe,
    PipeName,
    PipeVersion,
    Installed,
    MultiInstalled,
    Upgrade,
    DupPackages,
    DupVersions,
    /// `O`, or a specific overlay reference.
    Overlay(Option<String>),
    OnlyOverlay(Option<String>),
    Restrict(RestrictFlags),
    Properties(PropertiesFlags),
    /// `T`: obsolescence / redundancy test.
    Obsolete,
    Stability(StabilityKind, StabilityScope),
    Field(MatchField),
    Algorithm(AlgorithmChoice),
    Pattern(String),
}

/// A compiled boolean expression over package tests.
#[derive(Debug)]
pub enum MatchNode {
    /// Matches every package; the empty query.
    All,
    Leaf(Box<PackageTest>),
    Not(Box<MatchNode>),
    And(Box<MatchNode>, Box<MatchNode>),
    Or(Box<MatchNode>, Box<MatchNode>),
    /// Placeholder for the piped name tests, replaced after stdin is read.
    PipeMarker,
}

impl MatchNode {
    /// Left-to-right evaluation with short-circuit for and/or.
    pub fn matches(&self, pkg: &mut Package, ctx: &EvalContext) -> bool {
        match self {
            MatchNode::All => true,
            MatchNode::Leaf(test) => test.matches(pkg, ctx),
            MatchNode::Not(inner) => !inner.matches(pkg, ctx),
            MatchNode::And(a, b) => a.matches(pkg, ctx) && b.matches(pkg, ctx),
            MatchNode::Or(a, b) => a.matches(pkg, ctx) || b.matches(pkg, ctx),
            MatchNode::PipeMarker => false,
        }
    }

    /// The union of attribute needs over all leaves.
    pub fn needs(&self) -> FetchStage {
        match self {
            MatchNode::All | MatchNode::PipeMarker => FetchStage::Name,
            MatchNode::Leaf(test) => test.needs(),
            MatchNode::Not(inner) => inner.needs(),
            MatchNode::And(a, b) | MatchNode::Or(a, b) => a.needs().max(b.needs()),
        }
    }

    fn replace_pipe_markers(self, replacement: &mut Option<MatchNode>) -> MatchNode {
        match self {
            MatchNode::PipeMarker => replacement.take().unwrap_or(MatchNode::PipeMarker),
            MatchNode::Not(inner) => {
                MatchNode::Not(Box::new(inner.replace_pipe_markers(replacement)))
            }
            MatchNode::And(a, b) => MatchNode::And(
                Box::new(a.replace_pipe_markers(replacement)),
                Box::new(b.replace_pipe_markers(replacement)),
            ),
            MatchNode::Or(a, b) => MatchNode::Or(
                Box::new(a.replace_pipe_markers(replacement)),
                Box::new(b.replace_pipe_markers(replacement)),
            ),
            other => other,
        }
    }

    fn contains_pipe_marker(&self) -> bool {
        match self {
            MatchNode::PipeMarker => true,
            MatchNode::Not(inner) => inner.contains_pipe_marker(),
            MatchNode::And(a, b) | MatchNode::Or(a, b) => {
                a.contains_pipe_marker() || b.contains_pipe_marker()
            }
            _ => false,
        }
    }
}

/// Packages (and optionally versions) named on stdin in pipe mode.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MarkedList {
    entries: BTreeMap<(String, String), Vec<Option<String>>>,
}

impl MarkedList {
    pub fn add(&mut self, category: &str, name: &str, version: Option<&str>) {
        self.entries
            .entry((category.to_owned(), name.to_owned()))
            .or_default()
            .push(version.map(str::to_owned));
    }

    pub fn versions(&self, category: &str, name: &str) -> Option<&[Option<String>]> {
        self.entries
            .get(&(category.to_owned(), name.to_owned()))
            .map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The compiled query.
#[derive(Debug)]
pub struct CompiledQuery {
    pub tree: MatchNode,
    pub marked: Option<MarkedList>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BinOp {
    And,
    Or,
}

/// Incremental tree builder: one frame per open parenthesis. Adjacent terms
/// combine with an implicit and.
#[derive(Debug, Default)]
struct TreeBuilder {
    frames: Vec<Frame>,
}

#[derive(Debug, Default)]
struct Frame {
    node: Option<MatchNode>,
    pending_op: Option<BinOp>,
    negate: bool,
}

impl TreeBuilder {
    fn new() -> Self {
        Self {
            frames: vec![Frame::default()],
        }
    }

    fn top(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("builder always has a frame")
    }

    fn push_node(&mut self, mut node: MatchNode) {
        let frame = self.top();
        if frame.negate {
            node = MatchNode::Not(Box::new(node));
            frame.negate = false;
        }
        let op = frame.pending_op.take().unwrap_or(BinOp::And);
        frame.node = Some(match frame.node.take() {
            None => node,
            Some(prev) => match op {
                BinOp::And => MatchNode::And(Box::new(prev), Box::new(node)),
                BinOp::Or => MatchNode::Or(Box::new(prev), Box::new(node)),
            },
        });
    }

    fn set_op(&mut self, op: BinOp) {
        self.top().pending_op = Some(op);
    }

    fn negate(&mut self) {
        let frame = self.top();
        frame.negate = !frame.negate;
    }

    fn open(&mut self) {
        self.frames.push(Frame::default());
    }

    fn close(&mut self) -> Result<(), QueryError> {
        if self.frames.len() < 2 {
            return Err(QueryError::UnbalancedParens);
        }
        let frame = self.frames.pop().expect("checked above");
        let node = frame.node.unwrap_or(MatchNode::All);
        self.push_node(node);
        Ok(())
    }

    fn finish(mut self) -> Result<MatchNode, QueryError> {
        if self.frames.len() != 1 {
            return Err(QueryError::UnbalancedParens);
        }
        let frame = self.frames.pop().expect("exactly one frame left");
        Ok(frame.node.unwrap_or(MatchNode::All))
    }
}

/// Compiles a token stream. `input` provides the stdin lines for pipe mode
/// and is only read when a pipe token occurred.
pub fn parse_query(
    tokens: &[QueryToken],
    mut input: Option<&mut dyn BufRead>,
    rc: &RcMap,
    header: &DbHeader,
    portdir: &str,
) -> Result<CompiledQuery, QueryError> {
    let mut builder = TreeBuilder::new();
    let mut test: Option<PackageTest> = None;
    let fuzzy_default = rc.int("LEVENSHTEIN_DISTANCE").max(0) as usize;

    // -1: names only, 0: both, 1: name-version required.
    let mut pipe_mode = 0i8;
    let mut use_pipe = false;
    let mut cur_pipe = false;

    let overlay_keys = |pattern: &Option<String>| -> BTreeSet<u32> {
        header
            .overlay_keys(pattern.as_deref().unwrap_or(""), Some(portdir))
            .into_iter()
            .collect()
    };

    macro_rules! use_test {
        () => {
            test.get_or_insert_with(PackageTest::new)
        };
    }

    let finish_test = |builder: &mut TreeBuilder,
                       test: &mut Option<PackageTest>,
                       cur_pipe: &mut bool|
     -> Result<(), QueryError> {
        if let Some(mut done) = test.take() {
            done.finalize(fuzzy_default)?;
            builder.push_node(MatchNode::Leaf(Box::new(done)));
        }
        if *cur_pipe {
            builder.push_node(MatchNode::PipeMarker);
            *cur_pipe = false;
        }
        Ok(())
    };

    for token in tokens {
        match token {
            QueryToken::And => {
                finish_test(&mut builder, &mut test, &mut cur_pipe)?;
                builder.set_op(BinOp::And);
            }
            QueryToken::Or => {
                finish_test(&mut builder, &mut test, &mut cur_pipe)?;
                builder.set_op(BinOp::Or);
            }
            QueryToken::Not => {
                finish_test(&mut builder, &mut test, &mut cur_pipe)?;
                builder.negate();
            }
            QueryToken::Open => {
                finish_test(&mut builder, &mut test, &mut cur_pipe)?;
                builder.open();
            }
            QueryToken::Close => {
                finish_test(&mut builder, &mut test, &mut cur_pipe)?;
                builder.close()?;
            }
            QueryToken::Pipe => {
                use_pipe = true;
                cur_pipe = true;
            }
            QueryToken::PipeName => {
                pipe_mode = -1;
                use_pipe = true;
                cur_pipe = true;
            }
            QueryToken::PipeVersion => {
                pipe_mode = 1;
                use_pipe = true;
                cur_pipe = true;
            }
            QueryToken::Installed => use_test!().toggle_installed(),
            QueryToken::MultiInstalled => use_test!().toggle_multi_installed(),
            QueryToken::Upgrade => use_test!().toggle_upgrade(),
            QueryToken::DupPackages => use_test!().toggle_dup_packages(),
            QueryToken::DupVersions => use_test!().toggle_dup_versions(),
            QueryToken::Overlay(pattern) => {
                let test = use_test!();
                match pattern {
                    None => test.toggle_overlay(),
                    Some(_) => test.set_overlay_keys(overlay_keys(pattern)),
                }
            }
            QueryToken::OnlyOverlay(pattern) => {
                use_test!().set_only_overlay_keys(overlay_keys(pattern));
            }
            QueryToken::Restrict(flags) => use_test!().add_restrict(*flags),
            QueryToken::Properties(flags) => use_test!().add_properties(*flags),
            QueryToken::Obsolete => {
                let checks = rc.redundant_checks();
                use_test!().set_obsolete(checks);
            }
            QueryToken::Stability(kind, scope) => use_test!().set_stability(StabilityFilter {
                kind: *kind,
                scope: *scope,
            }),
            QueryToken::Field(field) => use_test!().add_field(*field),
            QueryToken::Algorithm(choice) => use_test!().set_algorithm(choice.clone()),
            QueryToken::Pattern(pattern) => {
                use_test!().set_pattern(pattern);
                finish_test(&mut builder, &mut test, &mut cur_pipe)?;
            }
        }
    }
    finish_test(&mut builder, &mut test, &mut cur_pipe)?;
    let mut tree = builder.finish()?;

    if !use_pipe {
        return Ok(CompiledQuery { tree, marked: None });
    }

    // Pipe mode: collect category/name words from stdin and attach them as
    // an or-joined group of exact tests.
    let mut marked = MarkedList::default();
    let mut pipe_tests: Option<MatchNode> = None;
    if let Some(input) = input.as_mut() {
        let mut line = String::new();
        loop {
            line.clear();
            match input.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            for word in line.split_whitespace() {
                let word = word.strip_prefix('=').unwrap_or(word);
                // Keep only category/name shaped words.
                let Some(slash) = word.find('/') else {
                    continue;
                };
                if slash == 0
                    || slash + 1 == word.len()
                    || word[slash + 1..].contains('/')
                {
                    continue;
                }

                let mut name = word;
                let mut version: Option<&str> = None;
                if pipe_mode >= 0 {
                    if let Some((head, ver)) = split_name_version(word) {
                        if Version::parse(ver, true).is_ok() {
                            name = head;
                            version = Some(ver);
                        }
                    }
                }
                if version.is_none() && pipe_mode > 0 {
                    continue;
                }

                let (category, plain_name) =
                    name.split_once('/').expect("checked for a slash above");
                marked.add(category, plain_name, version);

                let mut test = PackageTest::new();
                test.add_field(MatchField::CATEGORY_NAME);
                test.set_algorithm(AlgorithmChoice::Exact);
                test.set_pattern(name);
                test.finalize(fuzzy_default)?;
                let leaf = MatchNode::Leaf(Box::new(test));
                pipe_tests = Some(match pipe_tests {
                    None => leaf,
                    Some(prev) => MatchNode::Or(Box::new(prev), Box::new(leaf)),
                });
            }
        }
    }

    let mut replacement = Some(pipe_tests.unwrap_or(MatchNode::PipeMarker));
    if tree.contains_pipe_marker() {
        tree = tree.replace_pipe_markers(&mut replacement);
    } else if let Some(extra) = replacement.take() {
        tree = match tree {
            MatchNode::All => extra,
            other => MatchNode::And(Box::new(other), Box::new(extra)),
        };
    }

    Ok(CompiledQuery {
        tree,
        marked: Some(marked),
    })
}
