pub mod client;
pub mod coordinator;
pub mod types;
