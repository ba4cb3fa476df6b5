//! Codex Integrity - proof verification and the integrity daemon gate

pub mod catalogue;
pub mod config;
pub mod daemon;
pub mod probe;
pub mod proof;

pub use catalogue::{Catalogue, InvariantSpec};
pub use config::{ProofVerificationConfig, VowConfig};
pub use daemon::{
    HealthSnapshot, HealthStatus, IntegrityDaemon, IntegrityEvaluation, IntegrityEvaluationA,
    IntegrityHealth, LastViolation,
};
pub use probe::ProbeReport;
pub use proof::{ProofInput, ProofReport, ProofVerifier, ProofViolation, TraceEntry};
