//! Embedded prompts
//!
//! Compiled into the binary from .pmt files at build time.

use tracing::debug;

pub const PROPAGATION_ANALYSIS: &str = include_str!("../../prompts/propagation_analysis.pmt");

pub const CONTEXT_GENERATION: &str = include_str!("../../prompts/context_generation.pmt");

pub const ADAPTATION_GUIDANCE: &str = include_str!("../../prompts/adaptation_guidance.pmt");

/// Review pass of the reflection/revision loop
pub const REFLECTION: &str = include_str!("../../prompts/reflection.pmt");

pub const REVISION: &str = include_str!("../../prompts/revision.pmt");

/// Get the embedded prompt by name
pub fn get_embedded(name: &str) -> Option<&'static str> {
    debug!(%name, "get_embedded: called");
    match name {
        "propagation_analysis" => Some(PROPAGATION_ANALYSIS),
        "context_generation" => Some(CONTEXT_GENERATION),
        "adaptation_guidance" => Some(ADAPTATION_GUIDANCE),
        "reflection" => Some(REFLECTION),
        "revision" => Some(REVISION),
        _ => {
            debug!("get_embedded: no match found");
            None
        }
    }
}
