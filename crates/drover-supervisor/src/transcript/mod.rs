//! Transcript capture: line decoding, persistence and the wakeup feed.

mod decoder;
mod drain;
mod feed;

pub use decoder::{DecodedLine, LineDecoder};
pub use drain::{DrainSummary, TranscriptDrain};
pub use feed::{FeedItem, FeedSender, FeedSource, publish};
