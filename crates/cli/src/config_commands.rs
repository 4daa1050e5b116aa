use std::path::Path;

use {anyhow::Result, clap::Subcommand};

use {
    courier_agents::fallback_chain,
    courier_config::validate::{self, Severity},
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors/warnings.
    Check {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
}

pub fn handle_config(action: ConfigAction, config_path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Check { verbose } => check(verbose, config_path),
    }
}

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn check(verbose: bool, config_path: Option<&Path>) -> Result<()> {
    let result = validate::validate(config_path);

    if let Some(ref path) = result.config_path {
        eprintln!("Checking {}\n", path.display());
    } else {
        eprintln!("No config file found; checking defaults.\n");
    }

    let mut shown = 0;
    for d in &result.diagnostics {
        if d.severity == Severity::Info && !verbose {
            continue;
        }

        let (color, label) = match d.severity {
            Severity::Error => (RED, "error"),
            Severity::Warning => (YELLOW, "warning"),
            Severity::Info => (CYAN, "info"),
        };

        if d.path.is_empty() {
            eprintln!("  {BOLD}{color}{label}{RESET} {}", d.message);
        } else {
            eprintln!("  {BOLD}{color}{label}{RESET} {}: {}", d.path, d.message);
        }
        shown += 1;
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);

    if shown > 0 {
        eprintln!();
    }

    if verbose && errors == 0 {
        print_model_chains(config_path)?;
    }

    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if errors > 0 {
        std::process::exit(1);
    }

    Ok(())
}

/// Effective model chain of every configured agent, primary first.
fn print_model_chains(config_path: Option<&Path>) -> Result<()> {
    let config = crate::load_config(config_path)?;
    let aliases = &config.agents.defaults.aliases;

    let mut agents = vec![config.agents.defaults.id.clone()];
    agents.extend(
        config
            .agents
            .list
            .iter()
            .map(|a| a.id.clone())
            .filter(|id| *id != config.agents.defaults.id),
    );
    for agent in agents {
        let chain: Vec<String> = fallback_chain(config.model_for(&agent), aliases)
            .iter()
            .map(ToString::to_string)
            .collect();
        eprintln!("  {BOLD}{agent}{RESET} {}", chain.join(" -> "));
    }
    eprintln!();
    Ok(())
}
