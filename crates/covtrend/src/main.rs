use std::io::Write;

use anyhow::{Context, Result};
use covtrend::cli::{Cli, Commands, parse_cli};
use covtrend::history::{
    open_tracker, run_cleanup_command, run_latest_command, run_record_command, run_stats_command,
    run_trend_command,
};
use covtrend::logging::init_logging;
use covtrend_config::{
    config_path, ensure_workspace_config, load_workspace_config, validate_config,
};
use covtrend_history::CancelToken;

fn main() -> Result<()> {
    let cli = parse_cli();
    init_logging(cli.log_format)?;
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    let workspace = cli.workspace.canonicalize().with_context(|| {
        format!(
            "failed to resolve workspace path {}",
            cli.workspace.display()
        )
    })?;

    // Only recording creates the config file; read-only commands fall back to defaults.
    let config = match cli.command {
        Commands::Record(_) => ensure_workspace_config(&workspace),
        _ => load_workspace_config(&workspace),
    }
    .with_context(|| {
        format!(
            "failed to load workspace config at {}",
            config_path(&workspace).display()
        )
    })?;
    for warning in validate_config(&config) {
        tracing::warn!(code = warning.code, "{}", warning.message);
    }

    let tracker = open_tracker(&workspace, &config.history)?;
    let cancel = CancelToken::new();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Commands::Record(args) => run_record_command(&tracker, &cancel, args, &mut out)?,
        Commands::Latest(args) => run_latest_command(&tracker, &cancel, args, &mut out)?,
        Commands::Trend(args) => run_trend_command(&tracker, &cancel, args, &mut out)?,
        Commands::Stats(args) => run_stats_command(&tracker, &cancel, args, &mut out)?,
        Commands::Cleanup => run_cleanup_command(&tracker, &cancel, &mut out)?,
    }
    out.flush().context("failed to flush stdout")?;
    Ok(())
}
