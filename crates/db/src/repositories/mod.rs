mod transition_repository;

pub use transition_repository::*;
