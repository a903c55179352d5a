//! Tools - External capabilities folded into prompts
//!
//! The only tool the session engine uses is a web page analyser. It runs as an
//! explicit step before a response prompt is built: the engine detects a URL in
//! the latest user message, calls the analyser, and hands the result to the
//! prompt builder as an attachment candidate.
//!
//! # Example
//!
//! ```rust,ignore
//! use colloquy_core::tools::{HttpWebAnalyser, ToolInvoker};
//!
//! let analyser = Arc::new(HttpWebAnalyser::new(Duration::from_secs(10), "colloquy")?);
//! let invoker = ToolInvoker::new(analyser, Duration::from_secs(15));
//!
//! if let Some(meta) = invoker.maybe_invoke(&last_user_message).await {
//!     println!("{} - {}", meta.title, meta.description);
//! }
//! ```

mod error;
mod invoker;
mod web_analyser;

pub use error::ToolError;
pub use invoker::{detect_url, ToolInvoker};
pub use web_analyser::{
    extract_metadata, HttpWebAnalyser, StaticWebAnalyser, WebAnalyser, WebPageMetadata,
};
