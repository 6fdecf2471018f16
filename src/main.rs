//! Purpose: `tickmerge` CLI entry point.
//! Role: Binary crate root; parses args, runs commands, emits JSON on stdout.
//! Invariants: `replay` writes exactly one JSON line per snapshot to stdout.
//! Invariants: Invalid-source notices and errors go to stderr, never stdout.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
#![allow(clippy::result_large_err)]
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::{
    Args, CommandFactory, Parser, Subcommand, ValueEnum, ValueHint,
    error::ErrorKind as ClapErrorKind,
};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use tracing_subscriber::EnvFilter;

mod command_dispatch;

use tickmerge::api::{
    AllowList, ArchiveReader, CachingResolver, DenyList, Error, ErrorKind, InvalidSource,
    ReadRequest, RecordType, ResolverOptions, Snapshot, SourceDescriptor, Symbol, SymbolFilter,
    to_exit_code,
};
use tickmerge::notice::{Notice, invalid_source_notice, notice_json};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(clap_error_summary(&err))
                        .with_hint(clap_error_hint(&err)),
                    ColorMode::Auto,
                ));
            }
        },
    };

    let color_mode = cli.color;
    let mut options = ResolverOptions::new();
    if let Some(dir) = cli.cache_dir {
        options = options.with_cache_dir(dir);
    }

    command_dispatch::dispatch_command(cli.command, options, color_mode)
        .map_err(add_corrupt_hint)
        .map_err(add_io_hint)
        .map_err(add_internal_hint)
        .map_err(|err| (err, color_mode))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

#[derive(Parser)]
#[command(
    name = "tickmerge",
    version,
    about = "Replay multi-stream market data archives in time order",
    long_about = None,
    before_help = r#"Each container (zip archive or directory) holds one stream per entry.
Streams are merged tick by tick: every snapshot holds the records that ended
at or before its frontier."#,
    after_help = r#"EXAMPLES
  $ tickmerge replay data/20240102.zip --type tick --date 2024-01-02
  $ tickmerge replay dir:data/20240102 --type bar --period-secs 300 --date 2024-01-02 --symbol spy
  $ tickmerge replay https://example.com/20240102.zip --type tick --date 2024-01-02 --limit 10
  $ tickmerge entries data/20240102.zip
  $ tickmerge cache prune --retention-hours 24"#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        help = "Cache directory for remote sources (default: ~/.tickmerge/cache)",
        value_hint = ValueHint::DirPath
    )]
    cache_dir: Option<PathBuf>,
    #[arg(
        long,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Replay a container as a sequence of frontier snapshots (JSONL)",
        after_help = r#"EXAMPLES
  $ tickmerge replay day.zip --type tick --date 2024-01-02
  $ tickmerge replay day.zip --type tick --date 2024-01-02 --exclude qqq

NOTES
  - Source: a path or http(s) URL, optionally prefixed with `zip:` or `dir:`
  - Output: one line per snapshot: {"frontier", "records": [{"symbol", "end_time", "data"}]}
  - Unreadable sources produce a notice on stderr and no snapshots"#
    )]
    Replay(ReplayArgs),
    #[command(about = "List the stream symbols of a container")]
    Entries {
        #[arg(help = "Container path or URL")]
        source: String,
    },
    #[command(arg_required_else_help = true, about = "Manage the remote source cache")]
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
    #[command(about = "Generate shell completion scripts")]
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum CacheCommand {
    #[command(about = "Delete cached files older than the retention window")]
    Prune {
        #[arg(long, help = "Retention window in hours (default: 168)")]
        retention_hours: Option<u64>,
    },
}

#[derive(Args)]
struct ReplayArgs {
    #[arg(help = "Container path or URL")]
    source: String,
    #[arg(long = "type", help = "Record type tag: tick|bar|jsonl")]
    record_type: String,
    #[arg(
        long,
        value_parser = parse_date,
        help = "Reference date YYYY-MM-DD (required unless --live)"
    )]
    date: Option<Date>,
    #[arg(long, help = "Treat timestamps as absolute epoch milliseconds")]
    live: bool,
    #[arg(long = "symbol", help = "Only replay this symbol (repeatable)")]
    symbols: Vec<String>,
    #[arg(long = "exclude", help = "Skip this symbol (repeatable)")]
    exclude: Vec<String>,
    #[arg(long, help = "Stop after this many snapshots")]
    limit: Option<usize>,
    #[arg(long, help = "Bar period in seconds (bar records only)")]
    period_secs: Option<u64>,
    #[arg(long, help = "Cache retention window in hours for remote sources")]
    retention_hours: Option<u64>,
}

fn parse_date(value: &str) -> Result<Date, String> {
    Date::parse(value, format_description!("[year]-[month]-[day]"))
        .map_err(|_| format!("expected YYYY-MM-DD, got {value:?}"))
}

fn retention_from_hours(hours: u64) -> Duration {
    Duration::from_secs(hours.saturating_mul(60 * 60))
}

fn run_replay(
    args: ReplayArgs,
    mut options: ResolverOptions,
    color_mode: ColorMode,
) -> Result<RunOutcome, Error> {
    let date = match (args.date, args.live) {
        (Some(date), _) => date,
        (None, true) => OffsetDateTime::now_utc().date(),
        (None, false) => {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("replay requires --date")
                .with_hint("Pass --date YYYY-MM-DD, or --live for epoch timestamps."));
        }
    };
    if let Some(hours) = args.retention_hours {
        options = options.with_retention(retention_from_hours(hours));
    }
    let source = SourceDescriptor::parse(&args.source)?;
    let mut record_type = RecordType::new(args.record_type);
    if let Some(secs) = args.period_secs {
        record_type = record_type.with_period(bar_period(secs)?);
    }

    let reader = ArchiveReader::new(CachingResolver::new(options), move |event: InvalidSource| {
        emit_notice(&notice_for(&event, "replay"), color_mode);
    });
    let mut request = ReadRequest::new(source, record_type, date).live(args.live);
    request.filter = build_filter(args.symbols, args.exclude);
    let merger = reader.read(request)?;

    let limit = args.limit.unwrap_or(usize::MAX);
    let mut stdout = io::stdout().lock();
    for snapshot in merger.take(limit) {
        let line = serde_json::to_string(&snapshot_json(&snapshot)?).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("json encode failed")
                .with_source(err)
        })?;
        if let Err(err) = writeln!(stdout, "{line}") {
            if err.kind() == io::ErrorKind::BrokenPipe {
                break;
            }
            return Err(Error::new(ErrorKind::Io)
                .with_message("failed to write snapshot")
                .with_source(err));
        }
    }
    Ok(RunOutcome::ok())
}

fn bar_period(secs: u64) -> Result<time::Duration, Error> {
    if secs == 0 {
        return Err(Error::new(ErrorKind::Usage).with_message("--period-secs must be positive"));
    }
    let secs = i64::try_from(secs).map_err(|_| {
        Error::new(ErrorKind::Usage)
            .with_message("--period-secs is too large")
            .with_hint("Pass a bar period in seconds that fits a signed 64-bit integer.")
    })?;
    Ok(time::Duration::seconds(secs))
}

fn run_entries(
    source: &str,
    options: ResolverOptions,
    color_mode: ColorMode,
) -> Result<RunOutcome, Error> {
    let source = SourceDescriptor::parse(source)?;
    let reader = ArchiveReader::new(CachingResolver::new(options), move |event: InvalidSource| {
        emit_notice(&notice_for(&event, "entries"), color_mode);
    });
    let symbols = reader.entries(&source)?;
    emit_json(json!({
        "source": source.to_string(),
        "entries": symbols,
    }));
    Ok(RunOutcome::ok())
}

fn run_cache_prune(
    mut options: ResolverOptions,
    retention_hours: Option<u64>,
) -> Result<RunOutcome, Error> {
    if let Some(hours) = retention_hours {
        options = options.with_retention(retention_from_hours(hours));
    }
    let cache_dir = options.cache_dir.clone();
    let removed = CachingResolver::new(options).prune()?;
    emit_json(json!({
        "cache_dir": cache_dir.display().to_string(),
        "removed": removed,
    }));
    Ok(RunOutcome::ok())
}

fn build_filter(symbols: Vec<String>, exclude: Vec<String>) -> Option<Box<dyn SymbolFilter>> {
    match (symbols.is_empty(), exclude.is_empty()) {
        (true, true) => None,
        (false, true) => Some(Box::new(AllowList::new(symbols))),
        (true, false) => Some(Box::new(DenyList::new(exclude))),
        (false, false) => {
            let allow = AllowList::new(symbols);
            let deny = DenyList::new(exclude);
            Some(Box::new(move |symbol: &Symbol| {
                allow.admits(symbol) && deny.admits(symbol)
            }))
        }
    }
}

fn format_time(value: OffsetDateTime) -> Result<String, Error> {
    value.format(&Rfc3339).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to format timestamp")
            .with_source(err)
    })
}

fn snapshot_json(snapshot: &Snapshot) -> Result<Value, Error> {
    let mut records = Vec::with_capacity(snapshot.len());
    for record in snapshot.records() {
        records.push(json!({
            "symbol": record.symbol,
            "end_time": format_time(record.end_time)?,
            "data": record.data,
        }));
    }
    Ok(json!({
        "frontier": format_time(snapshot.frontier())?,
        "records": records,
    }))
}

fn emit_json(value: Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn notice_time_now() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|duration| {
            OffsetDateTime::from_unix_timestamp_nanos(duration.as_nanos() as i128).ok()
        })
        .and_then(|ts| ts.format(&Rfc3339).ok())
        .unwrap_or_default()
}

fn notice_for(event: &InvalidSource, cmd: &str) -> Notice {
    invalid_source_notice(event, cmd, notice_time_now())
}

fn emit_notice(notice: &Notice, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        let label = colorize_label("notice:", color_mode.use_color(is_tty), AnsiColor::Yellow);
        eprintln!("{label} {} (source: {})", notice.message, notice.source);
        return;
    }

    let value = notice_json(notice);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"notice\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn add_io_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::Permission => err.with_hint(
            "Permission denied. Check directory permissions or use --cache-dir to a writable location.",
        ),
        ErrorKind::Busy => err.with_hint("Cache is locked by another process. Retry shortly."),
        ErrorKind::Io => err.with_hint("I/O error. Check the path, filesystem, and disk space."),
        ErrorKind::Transport => err.with_hint("Check network access, or retry later."),
        _ => err,
    }
}

fn add_corrupt_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Corrupt || err.hint().is_some() {
        return err;
    }
    err.with_hint("Container appears corrupt. Re-download it or delete the cached copy.")
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "Unexpected internal failure. Retry with RUST_LOG=debug and share command/context if it persists.",
    )
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::Empty => "source is empty".to_string(),
        ErrorKind::Busy => "resource is busy".to_string(),
        ErrorKind::Permission => "permission denied".to_string(),
        ErrorKind::Corrupt => "corrupt data".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
        ErrorKind::Transport => "transport error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(entry) = err.entry() {
        inner.insert("entry".to_string(), json!(entry));
    }
    if let Some(line) = err.line() {
        inner.insert("line".to_string(), json!(line));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    ));

    if let Some(hint) = err.hint() {
        lines.push(format!(
            "{} {hint}",
            colorize_label("hint:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(path) = err.path() {
        lines.push(format!(
            "{} {}",
            colorize_label("path:", use_color, AnsiColor::Yellow),
            path.display()
        ));
    }
    if let Some(entry) = err.entry() {
        lines.push(format!(
            "{} {entry}",
            colorize_label("entry:", use_color, AnsiColor::Yellow)
        ));
    }

    if let Some(cause) = error_causes(err).first() {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }

    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

fn clap_error_hint(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let usage = rendered
        .lines()
        .find_map(|line| line.trim().strip_prefix("Usage: "))
        .map(str::trim);
    let Some(usage) = usage else {
        return "Try `tickmerge --help`.".to_string();
    };

    let tokens: Vec<&str> = usage.split_whitespace().collect();
    let Some(pos) = tokens.iter().position(|t| *t == "tickmerge") else {
        return "Try `tickmerge --help`.".to_string();
    };
    let parts: Vec<&str> = tokens
        .iter()
        .skip(pos + 1)
        .take_while(|token| {
            !(token.starts_with('-') || token.starts_with('<') || token.starts_with('['))
        })
        .copied()
        .collect();
    if parts.is_empty() {
        return "Try `tickmerge --help`.".to_string();
    }
    format!("Try `tickmerge {} --help`.", parts.join(" "))
}

#[cfg(test)]
mod tests {
    use super::{
        Cli, Command, bar_period, build_filter, clap_error_hint, parse_date, snapshot_json,
    };
    use clap::Parser;
    use serde_json::json;
    use std::io::Cursor;
    use tickmerge::api::{
        BufLines, ErrorKind, FrontierMerger, ParseContext, ParserRegistry, RecordType,
        StreamCursor, Symbol, SymbolFilter,
    };
    use time::macros::date;

    #[test]
    fn parse_date_accepts_iso_days_only() {
        assert_eq!(parse_date("2024-01-02"), Ok(date!(2024 - 01 - 02)));
        assert!(parse_date("01/02/2024").is_err());
    }

    #[test]
    fn bar_period_rejects_zero_and_out_of_range_seconds() {
        assert_eq!(bar_period(300).expect("period"), time::Duration::minutes(5));
        assert_eq!(bar_period(0).expect_err("zero").kind(), ErrorKind::Usage);
        let err = bar_period(u64::MAX).expect_err("overflow");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(err.message(), Some("--period-secs is too large"));
    }

    #[test]
    fn oversized_period_flag_parses_then_fails_as_usage() {
        let cli = Cli::try_parse_from([
            "tickmerge",
            "replay",
            "x.zip",
            "--type",
            "bar",
            "--date",
            "2024-01-02",
            "--period-secs",
            "18446744073709551615",
        ])
        .expect("u64 max parses");
        let Command::Replay(args) = cli.command else {
            panic!("expected replay");
        };
        let secs = args.period_secs.expect("period");
        assert_eq!(bar_period(secs).expect_err("overflow").kind(), ErrorKind::Usage);
    }

    #[test]
    fn combined_filters_require_allow_and_not_deny() {
        let filter = build_filter(
            vec!["spy".to_string(), "qqq".to_string()],
            vec!["qqq".to_string()],
        )
        .expect("filter");
        assert!(filter.admits(&Symbol::new("spy")));
        assert!(!filter.admits(&Symbol::new("qqq")));
        assert!(!filter.admits(&Symbol::new("iwm")));
        assert!(build_filter(Vec::new(), Vec::new()).is_none());
    }

    #[test]
    fn clap_hint_names_the_subcommand() {
        let err = match Cli::try_parse_from(["tickmerge", "replay", "x.zip"]) {
            Err(err) => err,
            Ok(_) => panic!("missing --type should fail"),
        };
        assert_eq!(clap_error_hint(&err), "Try `tickmerge replay --help`.");
    }

    #[test]
    fn snapshots_render_rfc3339_times_and_payloads() {
        let lines = BufLines::new(Cursor::new(b"1000,10.5,3\n".to_vec()));
        let parser = ParserRegistry::with_builtins().get("tick").expect("tick");
        let context = ParseContext::new(
            Symbol::new("spy"),
            RecordType::new("tick"),
            date!(2024 - 01 - 02),
            false,
        );
        let cursor = StreamCursor::new(Box::new(lines), parser, context);
        let snapshot = FrontierMerger::new(vec![cursor]).next().expect("snapshot");

        let value = snapshot_json(&snapshot).expect("json");
        assert_eq!(value["frontier"], json!("2024-01-02T00:00:01Z"));
        assert_eq!(value["records"][0]["symbol"], json!("spy"));
        assert_eq!(value["records"][0]["end_time"], json!("2024-01-02T00:00:01Z"));
        assert_eq!(value["records"][0]["data"]["price"], json!(10.5));
    }
}
