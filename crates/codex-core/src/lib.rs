//! Codex Core - proposal model, violation taxonomy, errors and storage helpers

pub mod clock;
pub mod error;
pub mod proposal;
pub mod spec;
pub mod store;
pub mod violation;

pub use clock::{Clock, SteppingClock, SystemClock};
pub use error::{Error, IntegrityViolation, PrivilegeReport, PrivilegeViolation, Result};
pub use proposal::{AmendmentProposal, OperatorNote, ProposalKind, ProposalStatus};
pub use spec::Spec;
pub use violation::{reason_codes, Violation, ViolationCode};
