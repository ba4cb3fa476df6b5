//! `codex` command line: operator front end over the amendment pipeline.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use codex_amendments::{
    AmendmentReviewBoard, Draft, GovernanceConfig, ProposalEdit, SpecAmender,
};
use codex_core::{Spec, SystemClock};
use codex_integrity::{ProofInput, ProofVerifier};
use serde::Serialize;
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(
    name = "codex",
    about = "Codex amendment governance: propose, verify, route and review spec amendments",
    version = env!("CARGO_PKG_VERSION")
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Governance root (overrides `[paths] root` from the config file)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Path to the governance config file (TOML)
    #[arg(long, global = true, default_value = "codex.toml")]
    pub config: PathBuf,

    /// Write logs to a file (in addition to stderr)
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Record a telemetry signal; drafts an amendment once the threshold is reached
    Signal {
        #[arg(long)]
        spec_id: String,
        /// Signal type, e.g. coverage_gap
        #[arg(long = "type")]
        signal_type: String,
        /// Current spec (JSON file)
        #[arg(long)]
        spec: PathBuf,
        /// Signal metadata as a JSON object
        #[arg(long, default_value = "{}")]
        metadata: String,
    },
    /// Submit a hand-written amendment
    Propose {
        #[arg(long)]
        spec_id: String,
        #[arg(long)]
        summary: String,
        /// Current spec (JSON file)
        #[arg(long)]
        original: PathBuf,
        /// Proposed spec (JSON file)
        #[arg(long)]
        proposed: PathBuf,
        /// Deltas as a JSON object
        #[arg(long, default_value = "{}")]
        deltas: String,
        /// Context as a JSON object
        #[arg(long, default_value = "{}")]
        context: String,
    },
    /// Propose the next version of a spec
    Regenerate {
        #[arg(long)]
        spec_id: String,
        #[arg(long)]
        operator: String,
        #[arg(long)]
        reason: String,
        /// Current spec (JSON file)
        #[arg(long)]
        spec: PathBuf,
    },
    /// Approve a pending amendment
    Approve {
        proposal_id: String,
        #[arg(long)]
        operator: String,
        /// Ledger reference recorded with the approval
        #[arg(long)]
        ledger_entry: Option<String>,
    },
    /// Reject a pending amendment
    Reject {
        proposal_id: String,
        #[arg(long)]
        operator: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Edit a pending amendment
    Edit {
        proposal_id: String,
        #[arg(long)]
        operator: String,
        #[arg(long)]
        summary: Option<String>,
        /// Replacement deltas as a JSON object
        #[arg(long)]
        deltas: Option<String>,
        /// Replacement proposed spec (JSON file)
        #[arg(long)]
        proposed: Option<PathBuf>,
    },
    /// Merge lineage metadata into an amendment
    Annotate {
        proposal_id: String,
        /// Lineage as a JSON object
        #[arg(long)]
        lineage: String,
        /// Extra context as a JSON object
        #[arg(long)]
        context: Option<String>,
    },
    /// Print one amendment
    Show { proposal_id: String },
    /// List pending amendments
    Pending,
    /// List approved amendments
    Active {
        #[arg(long)]
        spec_id: Option<String>,
    },
    /// Print the dashboard panel
    Dashboard,
    /// Print integrity daemon health
    Health,
    /// Run the proof verifier over a JSON payload
    Verify {
        /// Payload with `spec`/`proposed_spec`, `original_spec`, `ledger_diff`, ...
        payload: PathBuf,
    },
    /// Export proof conditions for an amendment
    Conditions { proposal_id: String },
    /// Set the signal count that triggers drafting
    Threshold { signal_type: String, count: u32 },
    /// Inspect or reset the proof budget governor's pressure state
    Governor {
        #[command(subcommand)]
        action: GovernorAction,
    },
    /// Print the effective configuration as TOML
    Config,
    /// Show version
    Version,
}

#[derive(Subcommand, Debug)]
pub enum GovernorAction {
    /// Print the pressure state and the budget a new proposal would get
    Show {
        #[arg(long, default_value = "codex")]
        spec_id: String,
    },
    /// Clear consecutive routing failures, leaving diagnostics-only mode
    Reset {
        #[arg(long)]
        operator: String,
    },
}

impl Cli {
    /// Config file, then environment, then `--root`.
    pub fn governance_config(&self) -> GovernanceConfig {
        let mut config = GovernanceConfig::load_with_env(&self.config);
        if let Some(root) = &self.root {
            config.paths.root = root.clone();
        }
        config
    }
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Signal { .. } => "signal",
            Self::Propose { .. } => "propose",
            Self::Regenerate { .. } => "regenerate",
            Self::Approve { .. } => "approve",
            Self::Reject { .. } => "reject",
            Self::Edit { .. } => "edit",
            Self::Annotate { .. } => "annotate",
            Self::Show { .. } => "show",
            Self::Pending => "pending",
            Self::Active { .. } => "active",
            Self::Dashboard => "dashboard",
            Self::Health => "health",
            Self::Verify { .. } => "verify",
            Self::Conditions { .. } => "conditions",
            Self::Threshold { .. } => "threshold",
            Self::Governor { .. } => "governor",
            Self::Config => "config",
            Self::Version => "version",
        }
    }
}

pub fn execute(cli: &Cli, out: &mut dyn Write) -> anyhow::Result<()> {
    let config = cli.governance_config();
    let command = cli.command.name();
    tracing::debug!(command, "Root: {}", config.paths.root.display());
    if let Err(e) = dispatch(cli, config, out) {
        tracing::error!(command, "{:#}", e);
        return Err(e);
    }
    Ok(())
}

fn dispatch(cli: &Cli, config: GovernanceConfig, out: &mut dyn Write) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Version => {
            writeln!(out, "codex v{}", env!("CARGO_PKG_VERSION"))?;
        }
        Commands::Config => {
            write!(out, "{}", config.to_toml())?;
        }
        Commands::Verify { payload: path } => {
            let payload: Value = read_json_file(path)?;
            let verifier = ProofVerifier::new(config.paths.root.join("vow"));
            let report = verifier.evaluate(&ProofInput::from_value(&payload));
            tracing::info!(
                valid = report.valid,
                violations = report.violations.len(),
                "Verified {}",
                path.display()
            );
            print_json(out, &report)?;
            writeln!(out, "{}", report.summary())?;
        }
        command => {
            let engine = Arc::new(SpecAmender::new(config, Arc::new(SystemClock))?);
            run_engine_command(command, engine, out)?;
        }
    }
    Ok(())
}

fn run_engine_command(
    command: &Commands,
    engine: Arc<SpecAmender>,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    let board = AmendmentReviewBoard::from_config(Arc::clone(&engine));
    match command {
        Commands::Signal {
            spec_id,
            signal_type,
            spec,
            metadata,
        } => {
            let current = read_spec(spec)?;
            let metadata = parse_object(metadata, "--metadata")?;
            match engine.record_signal(spec_id, signal_type, metadata, &current)? {
                Some(proposal) => print_json(out, &proposal)?,
                None => {
                    tracing::info!(%spec_id, %signal_type, "Signal recorded, no amendment drafted");
                    writeln!(out, "No amendment drafted for {spec_id}")?
                }
            }
        }
        Commands::Propose {
            spec_id,
            summary,
            original,
            proposed,
            deltas,
            context,
        } => {
            let mut draft = Draft::amendment(spec_id.as_str(), summary.as_str());
            draft.original_spec = read_spec(original)?;
            draft.proposed_spec = read_spec(proposed)?;
            draft.deltas = parse_object(deltas, "--deltas")?;
            draft.context = parse_object(context, "--context")?;
            print_json(out, &engine.propose_manual(draft)?)?;
        }
        Commands::Regenerate {
            spec_id,
            operator,
            reason,
            spec,
        } => {
            let current = read_spec(spec)?;
            print_json(out, &board.regenerate(spec_id, operator, reason, &current)?)?;
        }
        Commands::Approve {
            proposal_id,
            operator,
            ledger_entry,
        } => {
            let proposal = board.approve(proposal_id, operator, ledger_entry.as_deref())?;
            print_json(out, &proposal)?;
        }
        Commands::Reject {
            proposal_id,
            operator,
            reason,
        } => {
            print_json(out, &board.reject(proposal_id, operator, reason.as_deref())?)?;
        }
        Commands::Edit {
            proposal_id,
            operator,
            summary,
            deltas,
            proposed,
        } => {
            let edit = ProposalEdit {
                summary: summary.clone(),
                deltas: deltas
                    .as_deref()
                    .map(|d| parse_object(d, "--deltas"))
                    .transpose()?,
                proposed_spec: proposed.as_deref().map(read_spec).transpose()?,
            };
            print_json(out, &board.edit(proposal_id, operator, edit)?)?;
        }
        Commands::Annotate {
            proposal_id,
            lineage,
            context,
        } => {
            let lineage = parse_object(lineage, "--lineage")?;
            let context = context
                .as_deref()
                .map(|c| parse_object(c, "--context"))
                .transpose()?;
            print_json(out, &engine.annotate_lineage(proposal_id, lineage, context)?)?;
        }
        Commands::Show { proposal_id } => {
            print_json(out, &engine.load_proposal(proposal_id)?)?;
        }
        Commands::Pending => {
            print_json(out, &engine.list_pending()?)?;
        }
        Commands::Active { spec_id } => {
            print_json(out, &engine.active_amendments(spec_id.as_deref())?)?;
        }
        Commands::Dashboard => {
            print_json(out, &engine.dashboard_state()?)?;
        }
        Commands::Health => {
            print_json(out, &engine.integrity_endpoint())?;
        }
        Commands::Conditions { proposal_id } => {
            let proposal = engine.load_proposal(proposal_id)?;
            print_json(out, &engine.daemon().generate_proof_conditions(&proposal)?)?;
        }
        Commands::Threshold { signal_type, count } => {
            engine.set_threshold(signal_type, *count)?;
            tracing::info!(%signal_type, count = (*count).max(1), "Threshold updated");
            writeln!(out, "Threshold for {signal_type} set to {}", (*count).max(1))?;
        }
        Commands::Governor { action } => match action {
            GovernorAction::Show { spec_id } => print_json(out, &engine.governor_status(spec_id))?,
            GovernorAction::Reset { operator } => {
                let write = engine.reset_pressure(operator)?;
                writeln!(out, "Governor pressure reset (state {})", write.new_hash)?;
            }
        },
        Commands::Version | Commands::Config | Commands::Verify { .. } => {}
    }
    Ok(())
}

fn print_json<T: Serialize>(out: &mut dyn Write, value: &T) -> anyhow::Result<()> {
    // Through Value so keys come out sorted.
    let value = serde_json::to_value(value)?;
    writeln!(out, "{}", serde_json::to_string_pretty(&value)?)?;
    Ok(())
}

fn read_json_file(path: &Path) -> anyhow::Result<Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn read_spec(path: &Path) -> anyhow::Result<Spec> {
    match read_json_file(path)? {
        Value::Object(spec) => Ok(spec),
        _ => bail!("{} does not contain a JSON object", path.display()),
    }
}

fn parse_object(raw: &str, flag: &str) -> anyhow::Result<Map<String, Value>> {
    match serde_json::from_str(raw).with_context(|| format!("parsing {flag}"))? {
        Value::Object(map) => Ok(map),
        _ => bail!("{flag} must be a JSON object"),
    }
}
