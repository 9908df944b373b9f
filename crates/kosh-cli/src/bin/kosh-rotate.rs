// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Standalone URL-VCR driver: replay recorded rotation scripts, or record a
//! new one interactively when no script is given.

use anyhow::{Context, Result};
use clap::Parser;
use kosh_cli::terminal::TtyUi;
use kosh_logging::CliLoggingArgs;
use kosh_vcr::{ActionRegistry, Credentials, Session, script};

#[derive(Parser)]
#[command(
    name = "kosh-rotate",
    version,
    about = "Record and replay the browser steps that rotate a password on a web form",
    after_help = "With no SCRIPT, runs an interactive recording session and prints the \
                  serialized script on quit.\n\nNote that secrets passed on the command \
                  line are visible to other local processes; prefer the prompts."
)]
struct Cli {
    /// base64 scripts to replay, in order
    scripts: Vec<String>,

    #[arg(short = 'u', long)]
    username: Option<String>,

    /// Current password (exposed via argv; prompting is safer)
    #[arg(short = 'p', long)]
    oldpass: Option<String>,

    /// New password (exposed via argv; prompting is safer)
    #[arg(short = 'n', long)]
    newpass: Option<String>,

    #[command(flatten)]
    logging: CliLoggingArgs,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.logging.clone().init("kosh-rotate")?;

    let creds = Credentials {
        username: cli.username,
        oldpass: cli.oldpass,
        newpass: cli.newpass,
    };
    let registry = ActionRegistry::standard();
    let mut ui = TtyUi;

    if cli.scripts.is_empty() {
        let mut session = Session::new(creds)?;
        let steps = session.record(&registry, &mut ui)?;
        if steps.is_empty() {
            eprintln!("nothing recorded");
        } else {
            println!("{}", script::encode(&steps));
        }
        return Ok(());
    }

    for (i, blob) in cli.scripts.iter().enumerate() {
        let steps = script::decode(blob).with_context(|| format!("decoding script {}", i + 1))?;
        let mut session = Session::new(creds.clone())?;
        session
            .replay(&registry, &mut ui, &steps)
            .with_context(|| format!("replaying script {}", i + 1))?;
        tracing::info!(script = i + 1, steps = steps.len(), "replay complete");
    }
    Ok(())
}
