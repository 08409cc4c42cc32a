//! Prompt Template System
//!
//! Oracle system prompts are `.pmt` Handlebars templates.
//!
//! Template loading chain:
//! 1. `<prompts-dir>/{name}.pmt` (configured override)
//! 2. Embedded fallback compiled from `water/prompts/`

pub mod embedded;
mod loader;

pub use loader::{PromptContext, PromptLoader};
