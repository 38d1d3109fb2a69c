pub mod catalog;
pub mod evaluator;
pub mod types;
