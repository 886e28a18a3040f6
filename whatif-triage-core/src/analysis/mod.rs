// analysis module - organises the triage pipeline into submodules

pub mod evaluator;
pub mod flatten;
pub mod locator;
pub mod report;

// re-export key public items for convenient access
pub use evaluator::{evaluate_property_change, Confidence, EvalReason, EvalStatus, Evaluation};
pub use flatten::{
    extract_resource_changes, flatten_property_changes, ChangeNode, FlattenedChange,
    PropertyChangeKind, ResourceChange,
};
pub use locator::{
    extract_search_terms, find_definition, DefinitionResult, DefinitionStatus, SearchTerms,
    SourceFileCache,
};
pub use report::{
    build_output, build_pending_evaluations, format_text_output, is_primary_resource,
    AnalysisOutput,
};
