//! Structured Output Parsing
//!
//! Parsing of model output into JSON values, both complete and while it is
//! still streaming in.
//!
//! # Example
//!
//! ```rust,ignore
//! use colloquy_core::parsing::JsonParser;
//!
//! let parser = JsonParser::new();
//! let result = parser.parse("```json\n{\"key\": \"value\",}\n```")?;
//! assert_eq!(result["key"], "value");
//!
//! let partial = parser.parse_partial("{\"role\": \"assistant\", \"content\": \"Hel")?;
//! assert_eq!(partial["content"], "Hel");
//! ```

mod json;
mod parser;

pub use json::JsonParser;
pub use parser::{ParseError, ParseResult};
