//! codex - amendment governance CLI
//!
//! Usage:
//!   codex signal --spec-id S --type coverage_gap --spec spec.json
//!   codex propose --spec-id S --summary "..." --original a.json --proposed b.json --deltas '{...}'
//!   codex approve <proposal_id> --operator aurora --ledger-entry ledger://...
//!   codex pending | active | dashboard | health
//!   codex version

use clap::Parser;
use sentientos_codex::{execute, logging, Cli};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init_tracing(cli.log_file.as_deref());

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    execute(&cli, &mut out)
}
