// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Grammar for the shell-assignment subset of make.conf-style files.
//!
//! The parser classifies every assignment while reading it: whether the key
//! belongs to the accumulating family and whether the right-hand side
//! expands the key itself (`USE="${USE} more"`). The loader in the parent
//! module only has to act on those flags, not re-derive them.

use std::path::Path;

use anyhow::{bail, Result};
use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take, take_while, take_while1},
    character::complete::{char as one_char, multispace1, not_line_ending},
    combinator::{map, opt, recognize, value},
    multi::{fold_many0, many0},
    sequence::{delimited, pair, preceded},
    IResult,
};
use nom_locate::LocatedSpan;

/// Keys whose assignments append to the previous value instead of
/// replacing it. Entries are glob patterns.
pub const ACCUMULATING_KEYS: &[&str] = &["USE", "CONFIG_*", "FEATURES", "ACCEPT_KEYWORDS"];

pub fn is_accumulating(key: &str) -> bool {
    ACCUMULATING_KEYS.iter().any(|pattern| {
        glob::Pattern::new(pattern)
            .map(|p| p.matches(key))
            .unwrap_or(false)
    })
}

/// Input with position tracking; the extra payload is the file being read,
/// for error messages.
pub type Span<'a> = LocatedSpan<&'a str, &'a Path>;

/// One piece of a right-hand side. Adjacent text (including unescaped
/// characters) is merged into a single `Text` piece while parsing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Piece<'a> {
    Text(String),
    /// A `${VAR}` or `$VAR` expansion site, holding the variable name.
    Var(&'a str),
}

/// A single `KEY=value` line, pre-classified for the loader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Assignment<'a> {
    pub key: &'a str,
    pub pieces: Vec<Piece<'a>>,
    /// The key is of the accumulating family (USE, CONFIG_*, ...).
    pub accumulating: bool,
    /// The right-hand side expands the key itself, so it already carries
    /// the previous value after resolution.
    pub extends_self: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Statement<'a> {
    Assign(Assignment<'a>),
    /// `source <path>`; the path may contain expansions.
    Source(Vec<Piece<'a>>),
}

/// Parses a whole file into statements.
///
/// `source` lines are only recognized with `allow_source`; anything that is
/// neither whitespace, a comment, an assignment nor an allowed source line
/// is a syntax error naming the file and line.
pub fn parse_file(input: Span<'_>, allow_source: bool) -> Result<Vec<Statement<'_>>> {
    let mut statements = Vec::new();
    let mut rest = skip_junk(input);
    while !rest.fragment().is_empty() {
        if allow_source {
            if let Ok((after, pieces)) = source_statement(rest) {
                statements.push(Statement::Source(pieces));
                rest = skip_junk(after);
                continue;
            }
        }
        match assignment(rest) {
            Ok((after, assign)) => {
                statements.push(Statement::Assign(assign));
                rest = skip_junk(after);
            }
            Err(_) => bail!(
                "{}: line {}: expected a variable assignment",
                rest.extra.display(),
                rest.location_line()
            ),
        }
    }
    Ok(statements)
}

/// Consumes whitespace and comment lines between statements.
fn skip_junk(input: Span) -> Span {
    fn junk(input: Span) -> IResult<Span, ()> {
        value(
            (),
            many0(alt((
                value((), multispace1),
                value((), pair(one_char('#'), opt(not_line_ending))),
            ))),
        )(input)
    }
    match junk(input) {
        Ok((rest, ())) => rest,
        // many0 is total; keep the input on the impossible error.
        Err(_) => input,
    }
}

fn key_name(input: Span) -> IResult<Span, Span> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

fn assignment(input: Span) -> IResult<Span, Assignment> {
    let (rest, key) = key_name(input)?;
    let (rest, _) = one_char('=')(rest)?;
    let (rest, pieces) = rvalue(rest)?;
    let key = *key.fragment();
    let extends_self = pieces
        .iter()
        .any(|piece| matches!(piece, Piece::Var(name) if *name == key));
    Ok((
        rest,
        Assignment {
            key,
            pieces,
            accumulating: is_accumulating(key),
            extends_self,
        },
    ))
}

fn source_statement(input: Span) -> IResult<Span, Vec<Piece>> {
    preceded(pair(tag("source"), multispace1), rvalue)(input)
}

fn rvalue(input: Span) -> IResult<Span, Vec<Piece>> {
    alt((double_quoted, single_quoted, bare_value))(input)
}

/// Fragments produced by the piece-level parsers before text merging.
enum Fragment<'a> {
    Text(&'a str),
    Var(&'a str),
}

fn merge<'a>(mut pieces: Vec<Piece<'a>>, fragment: Fragment<'a>) -> Vec<Piece<'a>> {
    match fragment {
        Fragment::Var(name) => pieces.push(Piece::Var(name)),
        Fragment::Text(text) => match pieces.last_mut() {
            Some(Piece::Text(tail)) => tail.push_str(text),
            _ => pieces.push(Piece::Text(text.to_owned())),
        },
    }
    pieces
}

fn expansion(input: Span) -> IResult<Span, &str> {
    map(
        preceded(
            one_char('$'),
            alt((delimited(one_char('{'), key_name, one_char('}')), key_name)),
        ),
        |name: Span| *name.fragment(),
    )(input)
}

/// A double-quoted value: text, `\`-escapes and expansions up to the
/// closing quote. A `$` that starts no expansion is kept as literal text.
fn double_quoted(input: Span) -> IResult<Span, Vec<Piece>> {
    delimited(
        one_char('"'),
        fold_many0(
            alt((
                map(expansion, Fragment::Var),
                map(preceded(one_char('\\'), take(1usize)), |s: Span| {
                    Fragment::Text(*s.fragment())
                }),
                map(is_not("$\"\\"), |s: Span| Fragment::Text(*s.fragment())),
                map(tag("$"), |s: Span| Fragment::Text(*s.fragment())),
            )),
            Vec::new,
            merge,
        ),
        one_char('"'),
    )(input)
}

/// A single-quoted value is taken verbatim; no expansions, no escapes.
fn single_quoted(input: Span) -> IResult<Span, Vec<Piece>> {
    map(
        delimited(one_char('\''), opt(is_not("'")), one_char('\'')),
        |text: Option<Span>| match text {
            Some(text) => vec![Piece::Text((*text.fragment()).to_owned())],
            None => Vec::new(),
        },
    )(input)
}

/// An unquoted value runs to the next whitespace. Not strictly part of the
/// format, but stray uses exist in real configurations.
fn bare_value(input: Span) -> IResult<Span, Vec<Piece>> {
    fold_many0(
        alt((
            map(expansion, Fragment::Var),
            map(
                take_while1(|c: char| !c.is_ascii_whitespace() && c != '$'),
                |s: Span| Fragment::Text(*s.fragment()),
            ),
            map(tag("$"), |s: Span| Fragment::Text(*s.fragment())),
        )),
        Vec::new,
        merge,
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(text: &str) -> Span<'_> {
        Span::new_extra(text, Path::new("test.conf"))
    }

    fn parse(text: &str) -> Vec<Statement<'_>> {
        parse_file(span(text), false).unwrap()
    }

    #[test]
    fn test_plain_assignment() {
        assert_eq!(
            parse("PORTDIR=/usr/portage"),
            vec![Statement::Assign(Assignment {
                key: "PORTDIR",
                pieces: vec![Piece::Text("/usr/portage".to_owned())],
                accumulating: false,
                extends_self: false,
            })]
        );
    }

    #[test]
    fn test_accumulating_classification() {
        let statements = parse("USE=\"x\"\nCONFIG_PROTECT=\"/etc\"\nPORTDIR=/a\n");
        let flags: Vec<bool> = statements
            .iter()
            .map(|s| match s {
                Statement::Assign(a) => a.accumulating,
                _ => panic!("expected assignments"),
            })
            .collect();
        assert_eq!(flags, vec![true, true, false]);
    }

    #[test]
    fn test_self_extension_detection() {
        let statements = parse("USE=\"${USE} foo\"\nUSE=\"$OTHER foo\"\n");
        match (&statements[0], &statements[1]) {
            (Statement::Assign(a), Statement::Assign(b)) => {
                assert!(a.extends_self);
                assert_eq!(
                    a.pieces,
                    vec![Piece::Var("USE"), Piece::Text(" foo".to_owned())]
                );
                assert!(!b.extends_self);
            }
            other => panic!("unexpected statements {other:?}"),
        }
    }

    #[test]
    fn test_escapes_merge_into_text() {
        let statements = parse(r#"FETCH="a\"b${X}c""#);
        match &statements[0] {
            Statement::Assign(a) => assert_eq!(
                a.pieces,
                vec![
                    Piece::Text("a\"b".to_owned()),
                    Piece::Var("X"),
                    Piece::Text("c".to_owned()),
                ]
            ),
            other => panic!("unexpected statement {other:?}"),
        }
    }

    #[test]
    fn test_single_quotes_are_verbatim() {
        let statements = parse(r#"A='${X} y'"#);
        match &statements[0] {
            Statement::Assign(a) => {
                assert_eq!(a.pieces, vec![Piece::Text("${X} y".to_owned())]);
            }
            other => panic!("unexpected statement {other:?}"),
        }
    }

    #[test]
    fn test_stray_dollar_is_literal() {
        let statements = parse("A=\"100$\"");
        match &statements[0] {
            Statement::Assign(a) => {
                assert_eq!(a.pieces, vec![Piece::Text("100$".to_owned())]);
            }
            other => panic!("unexpected statement {other:?}"),
        }
    }

    #[test]
    fn test_comments_and_blank_lines() {
        let statements = parse("# a comment\n\nUSE=\"x\"\n# trailing\n");
        assert_eq!(statements.len(), 1);
    }

    #[test]
    fn test_source_gating() {
        parse_file(span("source other.conf"), false).expect_err("source must be rejected");
        let statements = parse_file(span("source other.conf"), true).unwrap();
        assert_eq!(
            statements,
            vec![Statement::Source(vec![Piece::Text("other.conf".to_owned())])]
        );
    }

    #[test]
    fn test_syntax_error_names_file_and_line() {
        let err = parse_file(span("USE=\"x\"\n!!!\n"), false).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("test.conf"));
        assert!(message.contains("line 2"));
    }
}
