//! On-disk layout of a governance root.

use codex_core::{ProposalStatus, Result};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn amendments_dir(&self) -> PathBuf {
        self.root.join("specs").join("amendments")
    }

    pub fn pending_dir(&self) -> PathBuf {
        self.amendments_dir().join("pending")
    }

    pub fn approved_dir(&self) -> PathBuf {
        self.amendments_dir().join("approved")
    }

    pub fn rejected_dir(&self) -> PathBuf {
        self.root.join("rejected_specs")
    }

    pub fn archive_proposals_dir(&self) -> PathBuf {
        self.amendments_dir().join("archive").join("proposals")
    }

    pub fn archive_originals_dir(&self) -> PathBuf {
        self.amendments_dir().join("archive").join("original_specs")
    }

    pub fn state_path(&self) -> PathBuf {
        self.amendments_dir().join("state.json")
    }

    pub fn amendment_log(&self) -> PathBuf {
        self.root.join("amendment_log.jsonl")
    }

    pub fn spec_log(&self) -> PathBuf {
        self.root.join("spec_log.jsonl")
    }

    pub fn pressure_state_path(&self) -> PathBuf {
        self.root.join("routing").join("pressure_state.json")
    }

    /// Create every proposal directory.
    pub fn ensure(&self) -> Result<()> {
        for dir in self.proposal_dirs() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::create_dir_all(self.archive_originals_dir())?;
        Ok(())
    }

    /// Where a proposal with `status` is stored. Quarantined and archived
    /// proposals share the archive.
    pub fn dir_for(&self, status: ProposalStatus) -> PathBuf {
        match status {
            ProposalStatus::Pending => self.pending_dir(),
            ProposalStatus::Approved => self.approved_dir(),
            ProposalStatus::Rejected => self.rejected_dir(),
            ProposalStatus::Quarantined | ProposalStatus::Archived => self.archive_proposals_dir(),
        }
    }

    /// Lookup order for proposal files.
    pub fn proposal_dirs(&self) -> [PathBuf; 4] {
        [
            self.pending_dir(),
            self.approved_dir(),
            self.rejected_dir(),
            self.archive_proposals_dir(),
        ]
    }

    pub fn proposal_path(&self, status: ProposalStatus, proposal_id: &str) -> PathBuf {
        self.dir_for(status).join(format!("{proposal_id}.json"))
    }
}
