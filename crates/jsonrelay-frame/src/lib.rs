//! Brace-balanced JSON framing for serial byte streams.
//!
//! Serial links carry concatenated JSON objects with no delimiter and no
//! length prefix. A frame is the span from a `{` to the byte where the brace
//! depth returns to zero:
//! - Bytes before the first `{` are discarded
//! - Incomplete frames stay buffered until more bytes arrive
//! - Frames are forwarded byte-identical, never re-serialized
//!
//! Braces inside JSON string literals are counted like any other brace.

pub mod error;
pub mod extractor;
pub mod reader;
pub mod writer;

pub use error::{FrameError, Result};
pub use extractor::{ExtractorConfig, Frame, FrameExtractor, Frames};
pub use reader::FrameReader;
pub use writer::FrameWriter;
