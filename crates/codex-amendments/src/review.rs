//! Amendment review board: the operator workflow over the spec amender.
//!
//! Approval needs a ledger entry and a passing privilege lint. The lint is
//! a hook so deployments can plug in their own checker.

use crate::amender::{ProposalEdit, ReviewOutcome, SpecAmender};
use codex_core::spec::Spec;
use codex_core::{
    AmendmentProposal, Error, PrivilegeReport, PrivilegeViolation, ProposalStatus, Result,
};
use serde_json::{json, Map, Value};
use std::process::Command;
use std::sync::Arc;

/// Privilege lint run before an approval takes effect.
pub trait ReviewBoardHook: Send + Sync {
    fn enforce(&self, spec_id: &str, proposal_id: &str) -> PrivilegeReport;
}

/// Passes every proposal.
pub struct PermissiveHook;

impl ReviewBoardHook for PermissiveHook {
    fn enforce(&self, spec_id: &str, proposal_id: &str) -> PrivilegeReport {
        tracing::warn!(spec_id, proposal_id, "No privilege lint configured, approving unchecked");
        PrivilegeReport::clean()
    }
}

/// Runs an external lint as `program [args..] <spec_id> <proposal_id>`.
/// Exit status 0 passes; otherwise each non-empty output line is an issue.
pub struct CommandHook {
    program: String,
    args: Vec<String>,
}

impl CommandHook {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Hook for a `[review] lint_command` entry; `None` when it is empty.
    pub fn from_command_line(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }
}

impl ReviewBoardHook for CommandHook {
    fn enforce(&self, spec_id: &str, proposal_id: &str) -> PrivilegeReport {
        let output = match Command::new(&self.program)
            .args(&self.args)
            .arg(spec_id)
            .arg(proposal_id)
            .output()
        {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(program = %self.program, "Privilege lint failed to start: {}", e);
                return PrivilegeReport::violation(vec![format!(
                    "privilege lint '{}' failed to start: {e}",
                    self.program
                )]);
            }
        };
        if output.status.success() {
            return PrivilegeReport::clean();
        }

        let mut issues: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .chain(String::from_utf8_lossy(&output.stderr).lines())
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        if issues.is_empty() {
            issues.push(format!("privilege lint exited with {}", output.status));
        }
        PrivilegeReport::violation(issues)
    }
}

pub struct AmendmentReviewBoard {
    engine: Arc<SpecAmender>,
    hook: Box<dyn ReviewBoardHook>,
}

impl AmendmentReviewBoard {
    pub fn new(engine: Arc<SpecAmender>, hook: Box<dyn ReviewBoardHook>) -> Self {
        Self { engine, hook }
    }

    /// Board with the hook named by the amender's `[review]` config.
    pub fn from_config(engine: Arc<SpecAmender>) -> Self {
        let hook: Box<dyn ReviewBoardHook> =
            match CommandHook::from_command_line(&engine.config().review.lint_command) {
                Some(hook) => Box::new(hook),
                None => Box::new(PermissiveHook),
            };
        Self::new(engine, hook)
    }

    pub fn engine(&self) -> &SpecAmender {
        &self.engine
    }

    /// Approve a pending proposal. A failed privilege lint quarantines it.
    pub fn approve(
        &self,
        proposal_id: &str,
        operator: &str,
        ledger_entry: Option<&str>,
    ) -> Result<AmendmentProposal> {
        let ledger_entry = ledger_entry
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .ok_or_else(|| Error::invalid_input("ledger entry required before approval"))?;
        let mut proposal = self.require_pending(proposal_id)?;
        let now = self.engine.now();

        let report = self.hook.enforce(&proposal.spec_id, &proposal.proposal_id);
        if !report.passed {
            proposal.status = ProposalStatus::Quarantined;
            proposal.updated_at = now;
            proposal.add_note(
                operator,
                "privilege-blocked",
                Some(object(json!({"issues": report.issues}))),
                now,
            );
            self.engine.persist(&proposal)?;
            self.engine.append_amendment_log(
                "privilege-blocked",
                &proposal.spec_id,
                &proposal.proposal_id,
                Some(json!({"operator": operator, "issues": report.issues})),
            )?;
            tracing::warn!(
                proposal_id,
                issues = report.issues.len(),
                "Approval blocked by privilege lint"
            );
            return Err(PrivilegeViolation {
                proposal_id: proposal.proposal_id,
                spec_id: proposal.spec_id,
                report,
            }
            .into());
        }

        proposal.status = ProposalStatus::Approved;
        proposal.ledger_entry = Some(ledger_entry.to_string());
        proposal.updated_at = now;
        proposal.add_note(
            operator,
            "approved",
            Some(object(json!({"ledger_entry": ledger_entry}))),
            now,
        );
        self.engine.persist(&proposal)?;
        self.engine.append_amendment_log(
            "approved",
            &proposal.spec_id,
            &proposal.proposal_id,
            Some(json!({"operator": operator, "ledger_entry": ledger_entry})),
        )?;
        self.engine.record_outcome(&proposal, ReviewOutcome::Approved)?;
        tracing::info!(proposal_id, operator, "Amendment approved");
        Ok(proposal)
    }

    pub fn reject(
        &self,
        proposal_id: &str,
        operator: &str,
        reason: Option<&str>,
    ) -> Result<AmendmentProposal> {
        let mut proposal = self.require_pending(proposal_id)?;
        let now = self.engine.now();
        proposal.status = ProposalStatus::Rejected;
        proposal.updated_at = now;
        proposal.add_note(operator, "rejected", Some(object(json!({"reason": reason}))), now);
        self.engine.persist(&proposal)?;
        self.engine.append_amendment_log(
            "rejected",
            &proposal.spec_id,
            &proposal.proposal_id,
            Some(json!({"operator": operator, "reason": reason})),
        )?;
        self.engine.record_outcome(&proposal, ReviewOutcome::Rejected)?;
        tracing::info!(proposal_id, operator, "Amendment rejected");
        Ok(proposal)
    }

    pub fn edit(&self, proposal_id: &str, operator: &str, edit: ProposalEdit) -> Result<AmendmentProposal> {
        self.engine.edit_proposal(proposal_id, operator, edit)
    }

    pub fn regenerate(
        &self,
        spec_id: &str,
        operator: &str,
        reason: &str,
        current_spec: &Spec,
    ) -> Result<AmendmentProposal> {
        self.engine.regenerate_spec(spec_id, operator, reason, current_spec)
    }

    fn require_pending(&self, proposal_id: &str) -> Result<AmendmentProposal> {
        let proposal = self.engine.load_proposal(proposal_id)?;
        if proposal.status != ProposalStatus::Pending {
            return Err(Error::invalid_input(format!(
                "amendment {proposal_id} is {} and cannot be reviewed",
                proposal.status
            )));
        }
        Ok(proposal)
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
