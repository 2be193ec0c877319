// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Command-line front end: `--update` rebuilds the index from the
//! configured trees, the default mode compiles the trailing arguments into
//! a query and streams the index through it.
//!
//! Exit codes: 0 if any package matched, 1 if none did, 2 on usage errors.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, warn};

use portdex::cache::db::PriorCache;
use portdex::cache::metadata::MetadataCache;
use portdex::cache::{CacheIngest, CategorySelect};
use portdex::config::PortageSettings;
use portdex::data::PackageTree;
use portdex::database::header::DbHeader;
use portdex::database::reader::{FetchStage, PackageReader};
use portdex::database::writer::write_tree;
use portdex::flags::{PropertiesFlags, RestrictFlags};
use portdex::rc::RcMap;
use portdex::search::matchtree::{parse_query, CompiledQuery, QueryToken};
use portdex::search::packagetest::{
    AlgorithmChoice, MatchField, StabilityKind, StabilityScope,
};
use portdex::search::{EvalContext, QueryError};
use portdex::vardb::VarDb;

#[derive(Parser, Debug)]
#[command(name = "portdex", about = "Index and query a ports tree")]
struct Args {
    /// Rebuild the index instead of querying it.
    #[arg(long)]
    update: bool,

    /// Index file location; defaults to the CACHE_FILE option.
    #[arg(long)]
    cache: Option<PathBuf>,

    /// Configuration root.
    #[arg(long, default_value = "/")]
    root: PathBuf,

    /// Print matching versions next to the package names.
    #[arg(short = 'v', long)]
    versions: bool,

    /// Query tokens (reverse-Polish; see the manual).
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    query: Vec<String>,
}

/// Maps command-line words onto query tokens. Single-letter tokens keep
/// their historic spelling; long names exist for all of them. Anything else
/// is a pattern argument.
fn tokenize(words: &[String]) -> Result<Vec<QueryToken>, QueryError> {
    let mut tokens = Vec::with_capacity(words.len());
    let mut words = words.iter().peekable();
    while let Some(word) = words.next() {
        let token = match word.as_str() {
            "-a" | "--and" | "a" => QueryToken::And,
            "-o" | "--or" | "o" => QueryToken::Or,
            "-!" | "--not" | "!" => QueryToken::Not,
            "(" => QueryToken::Open,
            ")" => QueryToken::Close,
            "|" | "--pipe" => QueryToken::Pipe,
            "--pipe-name" => QueryToken::PipeName,
            "--pipe-version" => QueryToken::PipeVersion,
            "-I" | "--installed" => QueryToken::Installed,
            "-i" | "--multi-installed" => QueryToken::MultiInstalled,
            "-u" | "--upgrade" => QueryToken::Upgrade,
            "-d" | "--dup-packages" => QueryToken::DupPackages,
            "-D" | "--dup-versions" => QueryToken::DupVersions,
            "-O" | "--overlay" => QueryToken::Overlay(None),
            "--in-overlay" => QueryToken::Overlay(words.next().cloned()),
            "--only-in-overlay" => QueryToken::OnlyOverlay(words.next().cloned()),
            "-T" | "--test-obsolete" => QueryToken::Obsolete,
            "--restrict-fetch" => QueryToken::Restrict(RestrictFlags::FETCH),
            "--restrict-mirror" => QueryToken::Restrict(RestrictFlags::MIRROR),
            "--restrict-primaryuri" => QueryToken::Restrict(RestrictFlags::PRIMARYURI),
            "--restrict-binchecks" => QueryToken::Restrict(RestrictFlags::BINCHECKS),
            "--restrict-strip" => QueryToken::Restrict(RestrictFlags::STRIP),
            "--restrict-test" => QueryToken::Restrict(RestrictFlags::TEST),
            "--restrict-userpriv" => QueryToken::Restrict(RestrictFlags::USERPRIV),
            "--restrict-installsources" => {
                QueryToken::Restrict(RestrictFlags::INSTALLSOURCES)
            }
            "--restrict-bindist" => QueryToken::Restrict(RestrictFlags::BINDIST),
            "--restrict-parallel" => QueryToken::Restrict(RestrictFlags::PARALLEL),
            "--properties-interactive" => {
                QueryToken::Properties(PropertiesFlags::INTERACTIVE)
            }
            "--properties-live" => QueryToken::Properties(PropertiesFlags::LIVE),
            "--properties-virtual" => QueryToken::Properties(PropertiesFlags::VIRTUAL),
            "--properties-set" => QueryToken::Properties(PropertiesFlags::SET),
            "--stable" => {
                QueryToken::Stability(StabilityKind::Stable, StabilityScope::Default)
            }
            "--testing" => {
                QueryToken::Stability(StabilityKind::Testing, StabilityScope::Default)
            }
            "--non-masked" => {
                QueryToken::Stability(StabilityKind::NonMasked, StabilityScope::Default)
            }
            "--system" => {
                QueryToken::Stability(StabilityKind::System, StabilityScope::Default)
            }
            "--stable-local" => {
                QueryToken::Stability(StabilityKind::Stable, StabilityScope::Local)
            }
            "--stable-nonlocal" => {
                QueryToken::Stability(StabilityKind::Stable, StabilityScope::NonLocal)
            }
            "-s" | "--name" | "s" => QueryToken::Field(MatchField::NAME),
            "-C" | "--category" => QueryToken::Field(MatchField::CATEGORY),
            "-A" | "--category-name" => QueryToken::Field(MatchField::CATEGORY_NAME),
            "-S" | "--description" => QueryToken::Field(MatchField::DESCRIPTION),
            "-L" | "--license" => QueryToken::Field(MatchField::LICENSE),
            "-H" | "--homepage" => QueryToken::Field(MatchField::HOMEPAGE),
            "-U" | "--iuse" => QueryToken::Field(MatchField::IUSE),
            "--provide" => QueryToken::Field(MatchField::PROVIDE),
            "--set" => QueryToken::Field(MatchField::SET),
            "--slot" => QueryToken::Field(MatchField::SLOT),
            "--depend" => QueryToken::Field(MatchField::DEPEND),
            "--rdepend" => QueryToken::Field(MatchField::RDEPEND),
            "--pdepend" => QueryToken::Field(MatchField::PDEPEND),
            "--deps" => QueryToken::Field(MatchField::DEPS),
            "-y" | "--any" => QueryToken::Field(MatchField::ANY),
            "-f" | "--fuzzy" => {
                // An optional numeric argument selects the distance.
                let distance = match words.peek().and_then(|w| w.parse::<usize>().ok()) {
                    Some(d) => {
                        words.next();
                        Some(d)
                    }
                    None => None,
                };
                QueryToken::Algorithm(AlgorithmChoice::Fuzzy(distance))
            }
            "-r" | "--regex" => QueryToken::Algorithm(AlgorithmChoice::Regex),
            "-e" | "--exact" => QueryToken::Algorithm(AlgorithmChoice::Exact),
            "-b" | "--begin" => QueryToken::Algorithm(AlgorithmChoice::Begin),
            "--end" => QueryToken::Algorithm(AlgorithmChoice::End),
            "-z" | "--substring" => QueryToken::Algorithm(AlgorithmChoice::Substring),
            "-p" | "--pattern" => QueryToken::Algorithm(AlgorithmChoice::Pattern),
            other if other.starts_with("--") => {
                return Err(QueryError::UnknownToken(other.to_owned()))
            }
            other => QueryToken::Pattern(other.to_owned()),
        };
        tokens.push(token);
    }
    Ok(tokens)
}

/// Options come from the environment; the rc file itself is handled by the
/// caller's shell profile.
fn rc_from_env() -> RcMap {
    let mut rc = RcMap::default();
    for (key, value) in std::env::vars() {
        if let Some(key) = key.strip_prefix("PORTDEX_") {
            rc.set(key, &value);
        }
    }
    rc
}

fn log_error(message: &str) {
    warn!("{message}");
}

/// Rebuilds the index: the primary tree and every overlay are ingested with
/// the configured cache method, then the tree is written out.
fn update(args: &Args, rc: &RcMap, settings: &PortageSettings, cache_file: &PathBuf) -> Result<()> {
    let method = rc.string("CACHE_METHOD").to_owned();
    let mut tree = PackageTree::new();
    let overlay_table = settings.overlay_table();
    let known: BTreeSet<String> = settings.categories().into_iter().collect();

    let mut run_ingest = |tree: &mut PackageTree, ingest: &mut dyn CacheIngest| -> Result<()> {
        debug!(method = %ingest.describe(), "reading tree");
        if known.is_empty() {
            ingest.read_categories(tree, CategorySelect::All, &log_error)?;
        } else {
            tree.need_fast_access(&known);
            ingest.read_categories(tree, CategorySelect::Restrict(&known), &log_error)?;
            tree.finish_fast_access();
        }
        Ok(())
    };

    if let Some(mut prior) = PriorCache::from_name(&method, cache_file, Some(&settings.portdir)) {
        // Re-reading a previous index is a single pass.
        run_ingest(&mut tree, &mut prior)?;
    } else {
        for (key, overlay) in overlay_table.iter().enumerate() {
            let portdir = PathBuf::from(&overlay.path);
            let Some(mut metadata) = MetadataCache::from_name(
                &method,
                &args.root,
                &portdir,
                &overlay.label,
                key as u32,
            ) else {
                anyhow::bail!("unknown cache method {method:?}");
            };
            run_ingest(&mut tree, &mut metadata)?;
        }
    }

    let header = DbHeader::new(overlay_table);
    if let Some(parent) = cache_file.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut out = BufWriter::new(
        File::create(cache_file)
            .with_context(|| format!("Failed to write {}", cache_file.display()))?,
    );
    write_tree(&mut out, &tree, &header)?;
    out.flush()?;
    println!(
        "{} categories, {} packages -> {}",
        tree.num_categories(),
        tree.num_packages(),
        cache_file.display()
    );
    Ok(())
}

/// Streams the index through the compiled query, printing matches.
fn query(
    args: &Args,
    rc: &RcMap,
    settings: &PortageSettings,
    cache_file: &PathBuf,
    compiled: &CompiledQuery,
) -> Result<bool> {
    let file = File::open(cache_file)
        .with_context(|| format!("Failed to open index {}", cache_file.display()))?;
    let mut input = BufReader::new(file);
    let header = DbHeader::read(&mut input).context("Failed to read index header")?;

    let vardb = VarDb::new(&args.root);
    let ctx = EvalContext {
        settings,
        vardb: &vardb,
        rc,
        header: &header,
    };

    let mut needs = compiled.tree.needs();
    if args.versions {
        needs = needs.max(FetchStage::Versions);
    }
    let mut reader = PackageReader::new(input, &header);
    let mut any = false;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    while reader.next()? {
        reader.read(needs)?;
        let mut pkg = reader.take();
        if !compiled.tree.matches(&mut pkg, &ctx) {
            continue;
        }
        any = true;
        if args.versions {
            let versions: Vec<String> = pkg
                .versions
                .iter()
                .map(|v| v.version.full())
                .collect();
            writeln!(out, "{} ({})", pkg.cat_name(), versions.join(" "))?;
        } else {
            writeln!(out, "{}", pkg.cat_name())?;
        }
    }
    Ok(any)
}

fn run(args: &Args) -> Result<ExitCode> {
    let rc = rc_from_env();
    let settings = PortageSettings::load(&args.root, &rc, true, &log_error)
        .context("Failed to load portage settings")?;
    let cache_file = args
        .cache
        .clone()
        .unwrap_or_else(|| args.root.join(rc.string("CACHE_FILE").trim_start_matches('/')));

    if args.update {
        update(args, &rc, &settings, &cache_file)?;
        return Ok(ExitCode::SUCCESS);
    }

    let tokens = match tokenize(&args.query) {
        Ok(tokens) => tokens,
        Err(e) => {
            eprintln!("portdex: {e}");
            return Ok(ExitCode::from(2));
        }
    };
    let stdin = std::io::stdin();
    let uses_pipe = tokens.iter().any(|t| {
        matches!(
            t,
            QueryToken::Pipe | QueryToken::PipeName | QueryToken::PipeVersion
        )
    });
    let mut locked;
    let input: Option<&mut dyn std::io::BufRead> = if uses_pipe {
        locked = stdin.lock();
        Some(&mut locked)
    } else {
        None
    };

    let compiled = match parse_query(&tokens, input, &rc, &read_header(&cache_file)?, &settings.portdir) {
        Ok(compiled) => compiled,
        Err(e) => {
            eprintln!("portdex: {e}");
            return Ok(ExitCode::from(2));
        }
    };

    let any = query(args, &rc, &settings, &cache_file, &compiled)?;
    Ok(if any {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn read_header(cache_file: &PathBuf) -> Result<DbHeader> {
    let file = File::open(cache_file)
        .with_context(|| format!("Failed to open index {}", cache_file.display()))?;
    DbHeader::read(&mut BufReader::new(file)).context("Failed to read index header")
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("portdex: {e:#}");
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_tokenize_spec_examples() {
        let tokens = tokenize(&words(&["-e", "-s", "foo"])).unwrap();
        assert_eq!(
            tokens,
            vec![
                QueryToken::Algorithm(AlgorithmChoice::Exact),
                QueryToken::Field(MatchField::NAME),
                QueryToken::Pattern("foo".into()),
            ]
        );

        let tokens =
            tokenize(&words(&["(", "-s", "foo", "-o", "-s", "bar", ")", "-a", "!", "-I"]))
                .unwrap();
        assert_eq!(tokens[0], QueryToken::Open);
        assert_eq!(tokens[3], QueryToken::Or);
        assert_eq!(tokens[6], QueryToken::Close);
        assert_eq!(tokens[8], QueryToken::Not);
        assert_eq!(tokens[9], QueryToken::Installed);
    }

    #[test]
    fn test_tokenize_fuzzy_distance() {
        let tokens = tokenize(&words(&["-f", "3", "vim"])).unwrap();
        assert_eq!(
            tokens,
            vec![
                QueryToken::Algorithm(AlgorithmChoice::Fuzzy(Some(3))),
                QueryToken::Pattern("vim".into()),
            ]
        );
        // Without a numeric argument the next word is the pattern.
        let tokens = tokenize(&words(&["-f", "vim"])).unwrap();
        assert_eq!(
            tokens,
            vec![
                QueryToken::Algorithm(AlgorithmChoice::Fuzzy(None)),
                QueryToken::Pattern("vim".into()),
            ]
        );
    }

    #[test]
    fn test_tokenize_rejects_unknown_long_options() {
        assert!(matches!(
            tokenize(&words(&["--frobnicate"])),
            Err(QueryError::UnknownToken(_))
        ));
    }
}
