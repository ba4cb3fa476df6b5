//! Codex Amendments - signal-driven spec amendments, routing orchestration and operator review

pub mod amender;
pub mod config;
pub mod layout;
pub mod review;
pub mod state;
pub mod variants;

pub use amender::{ProposalEdit, ReviewOutcome, SpecAmender};
pub use config::{
    AmendmentSettings, GovernanceConfig, GovernorSettings, PathSettings, ProvenanceSettings,
    ReviewSettings,
};
pub use layout::Layout;
pub use review::{AmendmentReviewBoard, CommandHook, PermissiveHook, ReviewBoardHook};
pub use state::{AmenderState, Preference, SignalBucket, SignalEntry};
pub use variants::{draft_variants, Draft, Variant};
