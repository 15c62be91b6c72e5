pub mod content;
pub mod search;
