//! Pure payoff rules. Nothing here performs I/O or holds run state.

pub mod capital;
pub mod compliance;
pub mod cooperative;
pub mod supervision;

pub use capital::{CapitalState, RewardMode};
pub use compliance::{rule_compliance_reward, CompliancePayoffs};
pub use cooperative::{settle, CooperationThreshold, CooperativeRules, Settlement, TierPayoffs};
pub use supervision::{supervision_for_round, Supervision, SupervisionPattern};
