//! Purpose: Hold top-level CLI command dispatch for `tickmerge`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Output envelopes and exit code semantics stay unchanged across commands.
//! Invariants: Helpers in `main.rs` remain the source of command business logic.

use super::*;

pub(super) fn dispatch_command(
    command: Command,
    options: ResolverOptions,
    color_mode: ColorMode,
) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "tickmerge", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Replay(args) => run_replay(args, options, color_mode),
        Command::Entries { source } => run_entries(&source, options, color_mode),
        Command::Cache { command } => match command {
            CacheCommand::Prune { retention_hours } => run_cache_prune(options, retention_hours),
        },
    }
}
