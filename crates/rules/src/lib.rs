pub mod extract;
pub mod guideline;
pub mod memo;
pub mod normalize;

pub use extract::{extract_rules, EnforcementContext, Rule, RuleKind};
pub use guideline::{guidelines_version, GuidelineRecord};
pub use memo::RuleSetMemo;
pub use normalize::{fingerprint, normalize, quick_hash};
