mod parser;
mod types;

pub use parser::{content_to_string, parse_content, parse_content_str};
pub use types::*;
