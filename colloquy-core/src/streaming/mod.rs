//! Streaming state machines
//!
//! A turn's backend output arrives as an ordered sequence of increments. The
//! types here turn that sequence into live snapshots for display and, once
//! the caller finishes the stream, into exactly one change to the
//! conversation: a new message or a new summary. Cancelling or dropping a
//! stream discards everything it has seen.
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//!
//! if let Some(mut stream) = engine.respond_to().await? {
//!     while let Some(snapshot) = stream.next().await {
//!         render(snapshot.content.as_deref().unwrap_or(""));
//!     }
//!     let message = stream.finish().await?;
//! }
//! ```

mod assembler;
mod response;
mod summary;

pub use assembler::{
    FinalizationFailure, PartialAssembly, PartialAttachment, PartialMessage,
    StreamingResponseAssembler,
};
pub use response::ResponseStream;
pub use summary::{normalize_summary, SummaryStream, SummaryUpdater};
