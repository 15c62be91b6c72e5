pub mod engine;
pub mod fusion;
