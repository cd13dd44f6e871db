pub mod ci_phase;
pub mod drafting_phase;
pub mod executor_context;
pub mod implementation_phase;
pub mod merge_phase;
pub mod review_phase;
pub mod testing_phase;

pub use ci_phase::CiPhase;
pub use drafting_phase::DraftingPhase;
pub use executor_context::{ExecutorConfig, ExecutorContext};
pub use implementation_phase::ImplementationPhase;
pub use merge_phase::MergePhase;
pub use review_phase::ReviewPhase;
pub use testing_phase::TestingPhase;
