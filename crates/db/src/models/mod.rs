pub(crate) mod transition;

pub use transition::TransitionRow;
