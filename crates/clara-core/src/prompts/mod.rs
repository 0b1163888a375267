//! Prompt templates.

pub mod suggestions;

pub use suggestions::{build_suggestion_prompt, SUGGESTION_SYSTEM};
