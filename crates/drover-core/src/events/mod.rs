//! Event protocol for protocol-emitting agents.
//!
//! Protocol-emitting agents write one JSON object per line on stdout. This
//! module decodes those lines into a closed set of [`Event`] variants,
//! implementing a tolerant reader: unknown fields are ignored, unknown event
//! types are passed through as [`Event::Unrecognized`], and anything that is
//! not a protocol line at all collapses to [`Event::Empty`].

mod parser;
mod types;

pub use parser::{decode_line, parse_line, parse_value};
pub use types::*;
