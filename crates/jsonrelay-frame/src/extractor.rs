use std::fmt;

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, warn};

use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;

/// A complete brace-balanced span taken from the byte stream.
///
/// The first byte is `{` and the brace depth returns to zero exactly at the
/// last byte. The content is not required to be valid JSON.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Bytes,
}

impl Frame {
    /// Validate `bytes` as exactly one balanced frame.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.first() != Some(&b'{') {
            return Err(FrameError::Malformed("frame must start with '{'"));
        }
        match balanced_end(bytes, 0, 0) {
            (Some(end), _) if end + 1 == bytes.len() => Ok(Self {
                bytes: Bytes::copy_from_slice(bytes),
            }),
            (Some(_), _) => Err(FrameError::Malformed("trailing bytes after frame")),
            (None, _) => Err(FrameError::Malformed("unbalanced braces")),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    /// Parse the frame as JSON. Only display paths use this; forwarding never
    /// looks inside a frame.
    pub fn parse_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_slice(&self.bytes)
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Frame")
            .field(&String::from_utf8_lossy(&self.bytes))
            .finish()
    }
}

/// Extractor tuning.
#[derive(Debug, Clone, Default)]
pub struct ExtractorConfig {
    /// Discard a pending partial frame once it grows past this many bytes.
    /// `None` buffers without limit.
    pub max_buffered: Option<usize>,
}

/// Incremental brace-depth frame extractor.
///
/// One extractor per inbound stream. The scan position and depth of an
/// incomplete frame are kept between feeds, so every byte is scanned once.
#[derive(Debug)]
pub struct FrameExtractor {
    buf: BytesMut,
    /// A `{` sits at `buf[0]` and a frame is being scanned.
    in_frame: bool,
    scan_pos: usize,
    depth: i64,
    config: ExtractorConfig,
    overflow_count: u64,
}

impl Default for FrameExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameExtractor {
    pub fn new() -> Self {
        Self::with_config(ExtractorConfig::default())
    }

    pub fn with_config(config: ExtractorConfig) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            in_frame: false,
            scan_pos: 0,
            depth: 0,
            config,
            overflow_count: 0,
        }
    }

    /// Append `bytes` and iterate the frames that are now complete.
    ///
    /// The iterator is lazy. Frames left unconsumed when it is dropped are
    /// yielded by the next call, including `feed(&[])`.
    pub fn feed(&mut self, bytes: &[u8]) -> Frames<'_> {
        self.buf.extend_from_slice(bytes);
        Frames { extractor: self }
    }

    /// Take the next complete frame out of the buffer, if there is one.
    pub fn next_frame(&mut self) -> Option<Frame> {
        if !self.in_frame {
            match self.buf.iter().position(|&b| b == b'{') {
                Some(start) => {
                    if start > 0 {
                        debug!(discarded = start, "dropping bytes before frame start");
                        self.buf.advance(start);
                    }
                    self.in_frame = true;
                    self.scan_pos = 0;
                    self.depth = 0;
                }
                None => {
                    if !self.buf.is_empty() {
                        debug!(discarded = self.buf.len(), "dropping bytes with no frame start");
                        self.buf.clear();
                    }
                    return None;
                }
            }
        }

        let (end, depth) = balanced_end(&self.buf, self.scan_pos, self.depth);
        match end {
            Some(end) => {
                let bytes = self.buf.split_to(end + 1).freeze();
                self.in_frame = false;
                self.scan_pos = 0;
                self.depth = 0;
                Some(Frame { bytes })
            }
            None => {
                self.scan_pos = self.buf.len();
                self.depth = depth;
                self.enforce_cap();
                None
            }
        }
    }

    fn enforce_cap(&mut self) {
        let Some(max) = self.config.max_buffered else {
            return;
        };
        if self.buf.len() > max {
            self.overflow_count += 1;
            warn!(
                buffered = self.buf.len(),
                max,
                overflows = self.overflow_count,
                "partial frame exceeded buffer cap, discarding"
            );
            self.reset();
        }
    }

    /// Drop all buffered bytes and any partial frame.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.in_frame = false;
        self.scan_pos = 0;
        self.depth = 0;
    }

    /// Bytes currently held, complete frames not yet taken included.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// How many partial frames the buffer cap has discarded.
    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }
}

/// Iterator over the frames completed by one [`FrameExtractor::feed`].
#[derive(Debug)]
pub struct Frames<'a> {
    extractor: &'a mut FrameExtractor,
}

impl Iterator for Frames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        self.extractor.next_frame()
    }
}

/// Scan `buf[from..]` continuing at `depth`. Returns the index where depth
/// reaches zero, and the depth at the end of the scan.
fn balanced_end(buf: &[u8], from: usize, mut depth: i64) -> (Option<usize>, i64) {
    for (i, &byte) in buf.iter().enumerate().skip(from) {
        match byte {
            b'{' => depth += 1,
            b'}' => depth -= 1,
            _ => continue,
        }
        if depth == 0 {
            return (Some(i), 0);
        }
    }
    (None, depth)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(extractor: &mut FrameExtractor, bytes: &[u8]) -> Vec<Vec<u8>> {
        extractor
            .feed(bytes)
            .map(|f| f.as_bytes().to_vec())
            .collect()
    }

    #[test]
    fn two_back_to_back_frames() {
        let mut ex = FrameExtractor::new();
        let frames = collect(&mut ex, br#"{"a":1}{"b":2}"#);
        assert_eq!(frames, vec![br#"{"a":1}"#.to_vec(), br#"{"b":2}"#.to_vec()]);
        assert_eq!(ex.buffered(), 0);
    }

    #[test]
    fn nested_object_is_one_frame() {
        let mut ex = FrameExtractor::new();
        let frames = collect(&mut ex, br#"{"a":{"b":1}}"#);
        assert_eq!(frames, vec![br#"{"a":{"b":1}}"#.to_vec()]);
    }

    #[test]
    fn garbage_prefix_is_discarded() {
        let mut ex = FrameExtractor::new();
        let frames = collect(&mut ex, br#"garbage{"a":1}"#);
        assert_eq!(frames, vec![br#"{"a":1}"#.to_vec()]);
    }

    #[test]
    fn incomplete_frame_waits_for_more_bytes() {
        let mut ex = FrameExtractor::new();
        assert!(collect(&mut ex, br#"{"a":"#).is_empty());
        assert_eq!(ex.buffered(), 5);

        let frames = collect(&mut ex, br#"1}{"b""#);
        assert_eq!(frames, vec![br#"{"a":1}"#.to_vec()]);
        assert_eq!(ex.buffered(), 4);
    }

    #[test]
    fn byte_at_a_time_matches_single_feed() {
        let stream = br#"xx{"a":{"b":[1,2]}} {"c":"d"}junk{"e":{}}"#;

        let mut whole = FrameExtractor::new();
        let expected = collect(&mut whole, stream);
        assert_eq!(expected.len(), 3);

        let mut split = FrameExtractor::new();
        let mut got = Vec::new();
        for byte in stream.iter() {
            got.extend(collect(&mut split, std::slice::from_ref(byte)));
        }
        assert_eq!(got, expected);
    }

    #[test]
    fn every_split_point_yields_same_frames() {
        let stream = br#"{"k":{"n":1}}{"m":2}"#;
        let mut whole = FrameExtractor::new();
        let expected = collect(&mut whole, stream);

        for split in 0..=stream.len() {
            let mut ex = FrameExtractor::new();
            let mut got = collect(&mut ex, &stream[..split]);
            got.extend(collect(&mut ex, &stream[split..]));
            assert_eq!(got, expected, "split at {split}");
        }
    }

    #[test]
    fn extraction_is_idempotent() {
        let mut ex = FrameExtractor::new();
        let frames = collect(&mut ex, br#"{"a":1}{"b":{"c":2}}"#);

        let mut again = FrameExtractor::new();
        let rejoined: Vec<u8> = frames.join(&b"\n"[..]);
        assert_eq!(collect(&mut again, &rejoined), frames);
    }

    #[test]
    fn dropped_iterator_resumes_on_next_feed() {
        let mut ex = FrameExtractor::new();
        let first = ex.feed(br#"{"a":1}{"b":2}"#).next().unwrap();
        assert_eq!(first.as_bytes(), br#"{"a":1}"#);

        let rest = collect(&mut ex, &[]);
        assert_eq!(rest, vec![br#"{"b":2}"#.to_vec()]);
    }

    #[test]
    fn braces_inside_strings_are_counted() {
        // Known limitation: a '}' inside a string literal closes the frame.
        let mut ex = FrameExtractor::new();
        let frames = collect(&mut ex, br#"{"s":"}"}"#);
        assert_eq!(frames, vec![br#"{"s":"}"#.to_vec()]);
        // The leftover `"}` has no frame start and is dropped.
        assert_eq!(ex.buffered(), 0);
    }

    #[test]
    fn stray_closing_braces_before_start_are_dropped() {
        let mut ex = FrameExtractor::new();
        let frames = collect(&mut ex, br#"}}{"a":1}"#);
        assert_eq!(frames, vec![br#"{"a":1}"#.to_vec()]);
    }

    #[test]
    fn buffer_cap_discards_oversized_partial() {
        let mut ex = FrameExtractor::with_config(ExtractorConfig {
            max_buffered: Some(8),
        });
        assert!(collect(&mut ex, br#"{"long":"aaaa"#).is_empty());
        assert_eq!(ex.buffered(), 0);
        assert_eq!(ex.overflow_count(), 1);

        let frames = collect(&mut ex, br#"{"a":1}"#);
        assert_eq!(frames, vec![br#"{"a":1}"#.to_vec()]);
    }

    #[test]
    fn uncapped_extractor_keeps_large_partial() {
        let mut ex = FrameExtractor::new();
        let mut big = b"{\"x\":\"".to_vec();
        big.extend(std::iter::repeat_n(b'a', 64 * 1024));
        assert!(collect(&mut ex, &big).is_empty());
        assert_eq!(ex.buffered(), big.len());

        let frames = collect(&mut ex, b"\"}");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), big.len() + 2);
    }

    #[test]
    fn from_slice_validates_balance() {
        assert!(Frame::from_slice(br#"{"a":1}"#).is_ok());
        assert!(matches!(
            Frame::from_slice(br#"{"a":1"#),
            Err(FrameError::Malformed(_))
        ));
        assert!(matches!(
            Frame::from_slice(br#"{"a":1} "#),
            Err(FrameError::Malformed(_))
        ));
        assert!(matches!(
            Frame::from_slice(b"[1]"),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn parse_json_reads_frame_content() {
        let frame = Frame::from_slice(br#"{"id":7}"#).unwrap();
        assert_eq!(frame.parse_json().unwrap()["id"], 7);
    }
}
