pub mod processor;
pub mod types;
