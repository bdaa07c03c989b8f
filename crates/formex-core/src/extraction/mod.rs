//! The extraction pipeline: prompt construction, response parsing and the
//! orchestrating service.

mod parser;
mod prompt;
mod service;

pub use parser::{NOT_FOUND_REASONING, ParsedResponse, parse_response};
pub use prompt::{DEFAULT_CHAR_BUDGET, PromptBuilder, SYSTEM_PROMPT, build_prompt, truncate_chars};
pub use service::{DocumentHistory, ExtractionService};
