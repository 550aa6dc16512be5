// kpisim CLI - headless KPI recalculation and formula editing

mod exit_codes;
mod store;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand};
use rustc_hash::FxHashMap;

use kpisim_config::Settings;
use kpisim_engine::formula::tokenizer::{kinds, tokenize, TokenKind};
use kpisim_engine::walker::evaluate_all;
use kpisim_engine::{
    EngineError, EngineSession, GameId, KpiId, KpiRepository, KpiSet, RecalcReport, RecalcScheduler, RepoError,
};

use exit_codes::{
    engine_exit_code, repo_exit_code, EXIT_CHECK_CIRCULAR, EXIT_CHECK_FORMULA, EXIT_EDIT_INVALID,
    EXIT_STORE_NOT_FOUND, EXIT_STORE_PERSIST, EXIT_SUCCESS, EXIT_USAGE,
};
use store::JsonFileRepository;

#[derive(Parser)]
#[command(name = "kpisim")]
#[command(about = "KPI formula engine (headless)")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    /// Settings file (default: ~/.config/kpisim/settings.json)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recalculate every calculated KPI of a game and write changed values back
    #[command(after_help = "\
Examples:
  kpisim recalc --store kpis.json --game season-1
  kpisim recalc --store kpis.json --game season-1 --dry-run --json")]
    Recalc {
        /// KPI store (JSON)
        #[arg(long)]
        store: PathBuf,

        /// Game id (default: settings cli.defaultGame)
        #[arg(long)]
        game: Option<String>,

        /// Compute and report without writing the store
        #[arg(long)]
        dry_run: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Report circular definitions and formula errors (non-zero exit if any)
    Check {
        #[arg(long)]
        store: PathBuf,

        #[arg(long)]
        game: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Show how a formula tokenizes
    #[command(after_help = "\
Examples:
  kpisim tokens 'kpi:0f8b2c1e-5d4a-4b3c-9e2f-1a2b3c4d5e6f * 2'
  kpisim tokens '(1 + 2) > 2 ? 1 : 0' --json")]
    Tokens {
        #[arg(allow_hyphen_values = true)]
        formula: String,

        #[arg(long)]
        json: bool,
    },

    /// Position-addressed formula edits
    #[command(subcommand)]
    Edit(EditCommands),

    /// Replace a calculated KPI's formula
    SetFormula {
        #[arg(long)]
        store: PathBuf,

        #[arg(long)]
        kpi: String,

        #[arg(allow_hyphen_values = true)]
        formula: String,

        /// Save without recalculating
        #[arg(long)]
        no_recalc: bool,
    },
}

#[derive(Subcommand)]
enum EditCommands {
    /// Delete the token at INDEX
    Delete {
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        kpi: String,
        #[arg(long)]
        index: usize,
        #[arg(long)]
        no_recalc: bool,
    },

    /// Move the token at FROM so it ends up at TO
    Move {
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        kpi: String,
        #[arg(long)]
        from: usize,
        #[arg(long)]
        to: usize,
        #[arg(long)]
        no_recalc: bool,
    },

    /// Insert a single token before INDEX (INDEX = token count appends)
    Insert {
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        kpi: String,
        #[arg(long)]
        index: usize,
        #[arg(allow_hyphen_values = true)]
        token: String,
        #[arg(long)]
        no_recalc: bool,
    },

    /// Print the formula with KPI names and its token list
    Show {
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        kpi: String,
    },
}

fn long_version() -> &'static str {
    if cfg!(debug_assertions) {
        concat!(env!("CARGO_PKG_VERSION"), "\nengine:  kpisim-engine ", env!("CARGO_PKG_VERSION"), "\nbuild:   debug")
    } else {
        concat!(env!("CARGO_PKG_VERSION"), "\nengine:  kpisim-engine ", env!("CARGO_PKG_VERSION"), "\nbuild:   release")
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path).unwrap_or_else(|e| {
            eprintln!("Error loading {}: {}", path.display(), e);
            Settings::default()
        }),
        None => Settings::load(),
    };
    init_logging(&settings);

    let result = match cli.command {
        Commands::Recalc { store, game, dry_run, json } => cmd_recalc(&settings, store, game, dry_run, json),
        Commands::Check { store, game, json } => cmd_check(&settings, store, game, json),
        Commands::Tokens { formula, json } => cmd_tokens(&formula, json),
        Commands::SetFormula { store, kpi, formula, no_recalc } => {
            cmd_edit(&settings, &store, &kpi, no_recalc, |session, id, now| {
                session.set_formula(id, &formula, now)?;
                formula_of(session, id)
            })
        }
        Commands::Edit(edit) => match edit {
            EditCommands::Delete { store, kpi, index, no_recalc } => {
                cmd_edit(&settings, &store, &kpi, no_recalc, |session, id, now| {
                    session.delete_token(id, index, now)
                })
            }
            EditCommands::Move { store, kpi, from, to, no_recalc } => {
                cmd_edit(&settings, &store, &kpi, no_recalc, |session, id, now| {
                    session.move_token(id, from, to, now)
                })
            }
            EditCommands::Insert { store, kpi, index, token, no_recalc } => match single_token(&token) {
                Ok(token) => cmd_edit(&settings, &store, &kpi, no_recalc, |session, id, now| {
                    session.insert_token(id, index, &token, now)
                }),
                Err(e) => Err(e),
            },
            EditCommands::Show { store, kpi } => cmd_show(&store, &kpi),
        },
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

/// RUST_LOG wins; otherwise the settings' "log.level".
fn init_logging(settings: &Settings) {
    let env = env_logger::Env::default().default_filter_or(settings.log_level.as_str());
    env_logger::Builder::from_env(env).format_timestamp(None).init();
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn new(code: u8, msg: impl Into<String>) -> Self {
        Self { code, message: msg.into(), hint: None }
    }

    pub fn args(msg: impl Into<String>) -> Self {
        Self::new(EXIT_USAGE, msg)
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl From<RepoError> for CliError {
    fn from(err: RepoError) -> Self {
        Self::new(repo_exit_code(&err), err.to_string())
    }
}

impl From<EngineError> for CliError {
    fn from(err: EngineError) -> Self {
        let hint = match &err {
            EngineError::Edit(_) => Some("run `kpisim edit show` to see token indices".to_string()),
            EngineError::NotCalculated(_) => Some("only calculated KPIs have formulas".to_string()),
            _ => None,
        };
        Self { code: engine_exit_code(&err), message: err.to_string(), hint }
    }
}

fn resolve_game(settings: &Settings, game: Option<String>) -> Result<GameId, CliError> {
    game.or_else(|| settings.default_game.clone())
        .map(GameId::new)
        .ok_or_else(|| {
            CliError::args("no game given").with_hint("pass --game or set \"cli.defaultGame\" in settings")
        })
}

fn names(repo: &JsonFileRepository) -> FxHashMap<KpiId, String> {
    repo.kpis().iter().map(|k| (k.id.clone(), k.name.clone())).collect()
}

fn name_of<'a>(names: &'a FxHashMap<KpiId, String>, id: &'a KpiId) -> &'a str {
    names.get(id).map_or(id.as_str(), String::as_str)
}

// ============================================================================
// recalc
// ============================================================================

fn cmd_recalc(
    settings: &Settings,
    store: PathBuf,
    game: Option<String>,
    dry_run: bool,
    json: bool,
) -> Result<(), CliError> {
    let game = resolve_game(settings, game)?;
    let repo = JsonFileRepository::open(&store)?;
    let names = names(&repo);

    let mut session = EngineSession::new(repo, game.clone(), RecalcScheduler::from_settings(settings));
    let report = session.recalculate_now()?.clone();

    if !dry_run {
        session.into_repo().save()?;
    }

    if json {
        let output = report_json(&report, &names, &game, dry_run);
        println!("{}", serde_json::to_string_pretty(&output).unwrap_or_default());
    } else {
        for id in &report.written {
            let value = report.value(id).unwrap_or(0.0);
            println!("{} = {}", name_of(&names, id), value);
        }
        print_problems(&report, &names);
        let prefix = if dry_run { "(dry run) " } else { "" };
        println!("{}{}", prefix, report.summary());
    }

    if !report.persist_failures.is_empty() {
        return Err(CliError::new(
            EXIT_STORE_PERSIST,
            format!("{} value(s) could not be written", report.persist_failures.len()),
        ));
    }
    Ok(())
}

fn report_json(
    report: &RecalcReport,
    names: &FxHashMap<KpiId, String>,
    game: &GameId,
    dry_run: bool,
) -> serde_json::Value {
    let written: Vec<_> = report
        .written
        .iter()
        .map(|id| {
            serde_json::json!({
                "id": id,
                "name": name_of(names, id),
                "value": report.value(id),
            })
        })
        .collect();
    let errors: Vec<_> = report
        .errors
        .iter()
        .map(|e| serde_json::json!({ "id": e.kpi, "error": e.error.to_string() }))
        .collect();
    let persist_failures: Vec<_> = report
        .persist_failures
        .iter()
        .map(|f| serde_json::json!({ "id": f.kpi, "value": f.value, "error": f.error.to_string() }))
        .collect();
    let cycles: Vec<_> = report.cycles.iter().map(|c| c.message.clone()).collect();

    serde_json::json!({
        "game": game.as_str(),
        "dry_run": dry_run,
        "evaluated": report.evaluated,
        "written": written,
        "unchanged": report.unchanged,
        "max_depth": report.max_depth,
        "circular": report.circular,
        "cycles": cycles,
        "errors": errors,
        "persist_failures": persist_failures,
        "duration_ms": report.duration_ms,
    })
}

fn print_problems(report: &RecalcReport, names: &FxHashMap<KpiId, String>) {
    for cycle in &report.cycles {
        eprintln!("warning: {}", cycle);
    }
    for error in &report.errors {
        eprintln!("warning: {}: {}", name_of(names, &error.kpi), error.error);
    }
    for failure in &report.persist_failures {
        eprintln!("warning: {} not saved: {}", name_of(names, &failure.kpi), failure.error);
    }
}

// ============================================================================
// check
// ============================================================================

fn cmd_check(settings: &Settings, store: PathBuf, game: Option<String>, json: bool) -> Result<(), CliError> {
    let game = resolve_game(settings, game)?;
    let repo = JsonFileRepository::open(&store)?;
    let names = names(&repo);
    let kpis: KpiSet = repo.list_kpis(&game)?.into_iter().collect();
    let outcome = evaluate_all(&kpis);

    if json {
        let errors: Vec<_> = outcome
            .faults
            .iter()
            .map(|f| serde_json::json!({ "id": f.kpi, "name": name_of(&names, &f.kpi), "error": f.error.to_string() }))
            .collect();
        let output = serde_json::json!({
            "game": game.as_str(),
            "ok": outcome.circular.is_empty() && outcome.faults.is_empty(),
            "circular": outcome.circular,
            "cycles": outcome.cycles,
            "errors": errors,
        });
        println!("{}", serde_json::to_string_pretty(&output).unwrap_or_default());
    } else {
        for group in &outcome.cycles {
            let members: Vec<&str> = group.iter().map(|id| name_of(&names, id)).collect();
            println!("circular: {}", members.join(" → "));
        }
        for fault in &outcome.faults {
            println!("error: {}: {}", name_of(&names, &fault.kpi), fault.error);
        }
        if outcome.circular.is_empty() && outcome.faults.is_empty() {
            println!("ok: {} calculated KPIs", kpis.calculated().count());
        }
    }

    if !outcome.circular.is_empty() {
        return Err(CliError::new(
            EXIT_CHECK_CIRCULAR,
            format!("{} KPI(s) in circular definitions", outcome.circular.len()),
        ));
    }
    if !outcome.faults.is_empty() {
        return Err(CliError::new(
            EXIT_CHECK_FORMULA,
            format!("{} formula error(s)", outcome.faults.len()),
        ));
    }
    Ok(())
}

// ============================================================================
// tokens
// ============================================================================

fn token_kind_name(kind: &TokenKind) -> &'static str {
    match kind {
        TokenKind::Reference { .. } => "reference",
        TokenKind::Operator(_) => "operator",
        TokenKind::Literal(_) => "literal",
    }
}

fn cmd_tokens(formula: &str, json: bool) -> Result<(), CliError> {
    let tokens = tokenize(formula);
    let parsed = kpisim_engine::formula::parse(&tokens);

    if json {
        let list: Vec<_> = tokens
            .iter()
            .enumerate()
            .map(|(i, t)| {
                serde_json::json!({
                    "index": i,
                    "kind": token_kind_name(&t.kind),
                    "text": t.kind.text(),
                    "start": t.span.start,
                    "end": t.span.end,
                })
            })
            .collect();
        let output = serde_json::json!({
            "tokens": list,
            "error": parsed.err().map(|e| e.to_string()),
        });
        println!("{}", serde_json::to_string_pretty(&output).unwrap_or_default());
    } else {
        print_tokens(&tokens);
        if let Err(e) = parsed {
            eprintln!("note: formula does not parse: {}", e);
        }
    }
    Ok(())
}

fn print_tokens(tokens: &[kpisim_engine::formula::Token]) {
    for (i, token) in tokens.iter().enumerate() {
        println!(
            "{:>3}  {:<9}  {:>3}..{:<3}  {}",
            i,
            token_kind_name(&token.kind),
            token.span.start,
            token.span.end,
            token.kind.text()
        );
    }
}

fn single_token(text: &str) -> Result<TokenKind, CliError> {
    match kinds(&tokenize(text)).as_slice() {
        [one] => Ok(one.clone()),
        _ => Err(CliError::new(EXIT_EDIT_INVALID, format!("'{}' is not a single formula token", text))),
    }
}

// ============================================================================
// edit / set-formula
// ============================================================================

type Session = EngineSession<JsonFileRepository>;

fn formula_of(session: &Session, id: &KpiId) -> Result<String, EngineError> {
    session
        .repo()
        .find(id)
        .and_then(|k| k.formula())
        .map(|f| f.text().to_string())
        .ok_or_else(|| EngineError::UnknownKpi(id.clone()))
}

/// Open the store, apply one formula edit, optionally recalculate, save.
fn cmd_edit<F>(settings: &Settings, store: &Path, kpi: &str, no_recalc: bool, edit: F) -> Result<(), CliError>
where
    F: FnOnce(&mut Session, &KpiId, Instant) -> Result<String, EngineError>,
{
    let repo = JsonFileRepository::open(store)?;
    let id = KpiId::from(kpi);
    let game = repo
        .find(&id)
        .map(|k| k.game_id.clone())
        .ok_or_else(|| CliError::new(EXIT_STORE_NOT_FOUND, format!("KPI {} not found in {}", id, store.display())))?;

    let mut session = EngineSession::new(repo, game, RecalcScheduler::from_settings(settings));
    let formula = edit(&mut session, &id, Instant::now())?;
    println!("{}", formula);

    if settings.auto_recalc && !no_recalc {
        let report = session.recalculate_now()?;
        log::info!("{}", report.summary());
        if !report.circular.is_empty() {
            eprintln!("warning: circular definitions: {}", report.circular.len());
        }
    }

    session.into_repo().save()?;
    Ok(())
}

fn cmd_show(store: &Path, kpi: &str) -> Result<(), CliError> {
    let repo = JsonFileRepository::open(store)?;
    let id = KpiId::from(kpi);
    let kpi = repo
        .find(&id)
        .ok_or_else(|| CliError::new(EXIT_STORE_NOT_FOUND, format!("KPI {} not found", id)))?;
    let game = kpi.game_id.clone();
    let text = kpi
        .formula()
        .map(|f| f.text().to_string())
        .ok_or_else(|| CliError::from(EngineError::NotCalculated(id.clone())))?;

    let session = EngineSession::new(repo, game, RecalcScheduler::default());
    println!("{}", session.display_formula(&id)?);
    print_tokens(&tokenize(&text));
    Ok(())
}
