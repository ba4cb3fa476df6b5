//! Codex Router - candidate scoring, two-stage promotion and the proof budget governor

pub mod governor;
pub mod router;

pub use governor::{
    decide_budget, governor_event, update_pressure_state, BudgetDecision, BudgetMode,
    GovernorConfig, PressureRun, PressureState, PressureStore, PressureWrite, RunContext,
};
pub use router::{
    choose_candidate, env_usize, flag_enabled, promote_candidates, rank_candidates, rank_stage_a, score_evaluation,
    severity_class, Assessment, CandidateResult, RouterConfig, RouterTelemetry, SelectionStatus,
};
