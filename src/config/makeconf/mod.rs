// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Loader for make.globals / make.conf / make.defaults style files.
//!
//! Values are kept partially resolved: expansions of variables assigned in
//! the same file chain are inlined immediately, references to variables
//! defined elsewhere stay symbolic until [`MakeConf::evaluate_into`] runs
//! against an environment.

mod parser;

use std::{
    collections::HashMap,
    fs::read_to_string,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};

pub use parser::{is_accumulating, ACCUMULATING_KEYS};

/// A dictionary of variables defined in configuration files and profiles.
pub type Vars = HashMap<String, String>;

#[derive(Clone, Debug, Eq, PartialEq)]
enum Value {
    Literal(String),
    UnresolvedExpansion(String),
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
struct RVal {
    vals: Vec<Value>,
}

impl RVal {
    fn push(&mut self, v: Value) {
        match (self.vals.last_mut(), &v) {
            (Some(Value::Literal(a)), Value::Literal(b)) => a.push_str(b),
            _ => self.vals.push(v),
        }
    }

    fn evaluate(&self, env: &Vars) -> String {
        let mut out = String::new();
        for value in &self.vals {
            match value {
                Value::Literal(s) => out.push_str(s),
                Value::UnresolvedExpansion(name) => {
                    out.push_str(env.get(name).map(|s| s.as_str()).unwrap_or_default())
                }
            }
        }
        out
    }

    fn literal_or_bail(&self) -> Result<String> {
        let mut out = String::new();
        for value in &self.vals {
            match value {
                Value::Literal(s) => out.push_str(s),
                Value::UnresolvedExpansion(name) => {
                    bail!("contains unresolved expansion ${}", name)
                }
            }
        }
        Ok(out)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MakeConf {
    sources: Vec<PathBuf>,
    values: HashMap<String, RVal>,
}

impl MakeConf {
    /// Loads a configuration file (or a directory of them, read in sorted
    /// order). `source` statements are only honored with `allow_source`.
    pub fn load(
        path: &Path,
        base_dir: &Path,
        allow_source: bool,
        allow_missing: bool,
    ) -> Result<Self> {
        let mut conf = Self::default();
        conf.load_file(path, base_dir, allow_source, allow_missing)?;
        Ok(conf)
    }

    fn load_file(
        &mut self,
        path: &Path,
        base_dir: &Path,
        allow_source: bool,
        allow_missing: bool,
    ) -> Result<()> {
        let source = base_dir.join(path);
        let context = || format!("Failed to load {}", source.display());

        if allow_missing && !source.exists() {
            return Ok(());
        }
        if source.is_dir() {
            let mut names = Vec::new();
            for entry in source.read_dir().with_context(context)? {
                names.push(entry?.file_name());
            }
            names.sort();
            for name in names {
                self.load_file(&path.join(name), base_dir, allow_source, allow_missing)
                    .with_context(context)?;
            }
            return Ok(());
        }

        let content = read_to_string(&source).with_context(context)?;
        let span = parser::Span::new_extra(&content, &source);
        let statements = parser::parse_file(span, allow_source).with_context(context)?;

        // Resolves parsed pieces against the values seen so far.
        let resolve = |values: &HashMap<String, RVal>, pieces: &[parser::Piece]| {
            let mut resolved = RVal::default();
            for piece in pieces {
                match piece {
                    parser::Piece::Text(text) => {
                        resolved.push(Value::Literal(text.clone()));
                    }
                    parser::Piece::Var(name) => match values.get(*name) {
                        None => {
                            resolved.push(Value::UnresolvedExpansion((*name).to_owned()));
                        }
                        Some(expanded) => {
                            for value in &expanded.vals {
                                resolved.push(value.clone());
                            }
                        }
                    },
                }
            }
            resolved
        };

        for statement in statements {
            match statement {
                parser::Statement::Assign(assign) => {
                    let mut resolved = resolve(&self.values, &assign.pieces);
                    // `KEY="${KEY} more"` extends itself already; appending
                    // on top of that would duplicate the old value.
                    if assign.accumulating && !assign.extends_self {
                        if let Some(old) = self.values.get(assign.key) {
                            if !old.vals.is_empty() && !resolved.vals.is_empty() {
                                let mut joined = old.clone();
                                joined.push(Value::Literal(" ".to_owned()));
                                for value in resolved.vals {
                                    joined.push(value);
                                }
                                resolved = joined;
                            }
                        }
                    }
                    self.values.insert(assign.key.to_owned(), resolved);
                }
                parser::Statement::Source(pieces) => {
                    let resolved = resolve(&self.values, &pieces);
                    let source_path =
                        base_dir.join(resolved.literal_or_bail().with_context(context)?);
                    self.load_file(&source_path, base_dir, allow_source, allow_missing)
                        .with_context(context)?;
                }
            }
        }

        self.sources.push(source);
        Ok(())
    }

    /// Evaluates all values against `env` and merges the results into it.
    pub fn evaluate_into(&self, env: &mut Vars) {
        let vars = self.evaluate_map(env);
        env.extend(vars);
    }

    /// Evaluates all values against `env` without touching it.
    pub fn evaluate_map(&self, env: &Vars) -> Vars {
        self.values
            .iter()
            .map(|(name, rval)| (name.clone(), rval.evaluate(env)))
            .collect()
    }

    /// Whether a key's value still expands the key itself, i.e. the file
    /// extends a value defined elsewhere (`USE="${USE} more"`).
    pub fn extends_environment(&self, key: &str) -> bool {
        self.values.get(key).is_some_and(|rval| {
            rval.vals
                .iter()
                .any(|v| matches!(v, Value::UnresolvedExpansion(name) if name == key))
        })
    }

    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    pub fn get(&self, key: &str, env: &Vars) -> Option<String> {
        self.values.get(key).map(|rval| rval.evaluate(env))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::write_files;

    #[test]
    fn test_self_extension_evaluates() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let dir = dir.as_ref();
        write_files(
            dir,
            [(
                "make.conf",
                "USE=\"foo\"\nUSE=\"${USE} bar\"\nUSE=\"${USE} baz\"\n",
            )],
        )?;
        let conf = MakeConf::load(&PathBuf::from("make.conf"), dir, false, false)?;
        let mut env = Vars::new();
        conf.evaluate_into(&mut env);
        assert_eq!(env.get("USE").unwrap(), "foo bar baz");
        Ok(())
    }

    #[test]
    fn test_accumulating_key_appends_without_expansion() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let dir = dir.as_ref();
        write_files(
            dir,
            [(
                "make.conf",
                "ACCEPT_KEYWORDS=\"amd64\"\nACCEPT_KEYWORDS=\"~amd64\"\nPORTDIR=/a\nPORTDIR=/b\n",
            )],
        )?;
        let conf = MakeConf::load(&PathBuf::from("make.conf"), dir, false, false)?;
        let mut env = Vars::new();
        conf.evaluate_into(&mut env);
        // ACCEPT_KEYWORDS accumulates; PORTDIR is replaced.
        assert_eq!(env.get("ACCEPT_KEYWORDS").unwrap(), "amd64 ~amd64");
        assert_eq!(env.get("PORTDIR").unwrap(), "/b");
        Ok(())
    }

    #[test]
    fn test_unresolved_expansion_resolves_against_env() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let dir = dir.as_ref();
        write_files(dir, [("make.conf", "USE=\"${USE} foo\"\n")])?;
        let conf = MakeConf::load(&PathBuf::from("make.conf"), dir, false, false)?;
        let mut env = Vars::from([("USE".to_owned(), "base".to_owned())]);
        conf.evaluate_into(&mut env);
        assert_eq!(env.get("USE").unwrap(), "base foo");
        Ok(())
    }

    #[test]
    fn test_source_inclusion() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let dir = dir.as_ref();
        write_files(
            dir,
            [
                ("make.conf", "A=1\nsource make.conf.user\nB=${A}${C}\n"),
                ("make.conf.user", "C=2\n"),
            ],
        )?;
        MakeConf::load(&PathBuf::from("make.conf"), dir, false, false)
            .expect_err("source must be rejected when disabled");

        let conf = MakeConf::load(&PathBuf::from("make.conf"), dir, true, false)?;
        let mut env = Vars::new();
        conf.evaluate_into(&mut env);
        assert_eq!(env.get("B").unwrap(), "12");
        assert_eq!(
            conf.sources(),
            &[dir.join("make.conf.user"), dir.join("make.conf")]
        );
        Ok(())
    }

    #[test]
    fn test_directory_reads_sorted() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let dir = dir.as_ref();
        write_files(
            dir,
            [
                ("make.conf/a.conf", "USE=\"$USE a\""),
                ("make.conf/b.conf", "USE=\"$USE b\""),
            ],
        )?;
        let conf = MakeConf::load(&PathBuf::from("make.conf"), dir, false, false)?;
        let mut env = Vars::new();
        conf.evaluate_into(&mut env);
        assert_eq!(env.get("USE").unwrap().trim(), "a b");
        Ok(())
    }

    #[test]
    fn test_allow_missing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let dir = dir.as_ref();
        MakeConf::load(&PathBuf::from("make.conf"), dir, false, false)
            .expect_err("missing file must fail without allow_missing");
        MakeConf::load(&PathBuf::from("make.conf"), dir, false, true)?;
        Ok(())
    }
}
