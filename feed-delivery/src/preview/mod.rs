pub mod context;
pub mod generate;
pub mod outcome;
pub mod stages;

pub use generate::{
    generate_preview, ArticlePreviewResult, MediumPreviewResult, PreviewDependencies, PreviewError, PreviewFeed,
    PreviewInput, PreviewResponse,
};
pub use outcome::{aggregate_outcomes, resolve_outcome, Outcome, ResolvedOutcome};
pub use stages::{build_complete_stage_list, StageKind, StageResult, StageStatus, CANONICAL_STAGES};
