//! Chunked packet codec (C1).
//!
//! Fragments an outgoing message set into frames no larger than a configured
//! chunk size, and reassembles them on the receiving side. This works around
//! brokers and proxies that cap individual WebSocket message sizes.
//!
//! # Wire format
//!
//! Given a logical packet serialised to frames `m1..mk`: if every frame is
//! already within the chunk size, frames pass through unchanged. Otherwise
//! each frame is split into contiguous pieces, and a single control frame
//! `C[c1,c2,...]` (a literal `C` followed by a compact JSON array of piece
//! counts) is prepended so the decoder knows how many pieces to concatenate
//! to reconstruct each original frame, in order.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// One wire-level frame: a WebSocket text or binary message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

impl Frame {
    /// Length of the frame's payload in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(s) => s.len(),
            Self::Binary(b) => b.len(),
        }
    }

    /// Returns `true` if the frame carries no payload.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    fn split(&self, chunk_size: usize) -> Vec<Self> {
        match self {
            Self::Text(s) => chunk_str(s, chunk_size).into_iter().map(Self::Text).collect(),
            Self::Binary(b) => chunk_bytes(b, chunk_size).into_iter().map(Self::Binary).collect(),
        }
    }
}

/// Split `s` into pieces of at most `chunk_size` bytes, cutting only on
/// char boundaries so no multi-byte UTF-8 character is ever split across two
/// pieces. A single character wider than `chunk_size` is kept whole in its
/// own oversized piece rather than corrupted.
fn chunk_str(s: &str, chunk_size: usize) -> Vec<String> {
    if s.is_empty() {
        return vec![String::new()];
    }
    let mut pieces = Vec::new();
    let mut start = 0;
    while start < s.len() {
        let mut end = (start + chunk_size).min(s.len());
        while end > start && !s.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            let next_char_len = s[start..].chars().next().map_or(1, char::len_utf8);
            end = start + next_char_len;
        }
        pieces.push(s[start..end].to_owned());
        start = end;
    }
    pieces
}

fn chunk_bytes(b: &[u8], chunk_size: usize) -> Vec<Vec<u8>> {
    if b.is_empty() {
        return vec![Vec::new()];
    }
    b.chunks(chunk_size).map(<[u8]>::to_vec).collect()
}

/// Errors raised while decoding the chunking envelope.
///
/// All of these are protocol errors: the caller must drop reassembly state
/// and force-close the transport session.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChunkError {
    /// The control frame body was not a JSON array of positive integers.
    #[error("malformed chunking control header: {0}")]
    MalformedHeader(String),
    /// A chunk count in the control header was zero or negative.
    #[error("chunking control header contains a non-positive count")]
    NonPositiveCount,
    /// A set of pieces being reassembled mixed text and binary frames.
    #[error("mixed text/binary frames cannot be reassembled")]
    MixedFrameTypes,
}

const CONTROL_PREFIX: char = 'C';

/// Encode a logical packet's frames, fragmenting into `chunk_size`-byte
/// pieces and prepending a control frame only when at least one frame
/// exceeds `chunk_size`.
///
/// A frame of length exactly `chunk_size` is never chunked (strict `<=`).
#[must_use]
pub fn encode_frames(frames: &[Frame], chunk_size: usize) -> Vec<Frame> {
    if frames.iter().all(|f| f.len() <= chunk_size) {
        return frames.to_vec();
    }

    let mut counts = Vec::with_capacity(frames.len());
    let mut pieces = Vec::new();
    for frame in frames {
        let split = frame.split(chunk_size);
        counts.push(split.len());
        pieces.extend(split);
    }

    // `serde_json` renders a `Vec<usize>` with no whitespace by default,
    // matching the `separators=(',', ':')` compact encoding of the original.
    let header = serde_json::to_string(&counts).unwrap_or_else(|_| "[]".to_owned());
    let control = Frame::Text(format!("{CONTROL_PREFIX}{header}"));

    let mut out = Vec::with_capacity(1 + pieces.len());
    out.push(control);
    out.extend(pieces);
    out
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(transparent)]
struct ChunkCounts(Vec<i64>);

/// Per-transport-session stateful decoder that reassembles chunked frames.
///
/// Frames belonging to one logical packet must arrive in order with no
/// interleaving from another logical packet: the transport does not
/// multiplex two packets while reassembly is active.
#[derive(Debug, Default)]
pub struct Reassembler {
    /// Remaining piece counts, one per not-yet-reassembled original frame.
    pending: Vec<usize>,
    /// Pieces accumulated so far for the frame currently being reassembled.
    buffer: Vec<Frame>,
}

/// Outcome of feeding one frame into a [`Reassembler`].
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    /// Not in reassembly; the frame passes through untouched.
    Passthrough(Frame),
    /// A control frame was consumed; reassembly has started.
    ControlConsumed,
    /// More pieces are needed before a frame can be reconstructed.
    Buffering,
    /// A frame has been fully reassembled and is ready to dispatch upward.
    Complete(Frame),
}

impl Reassembler {
    /// Create an empty decoder, not currently reassembling.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Returns `true` if a chunked packet is currently being reassembled.
    #[must_use]
    pub fn is_reassembling(&self) -> bool { !self.pending.is_empty() }

    /// Feed one inbound frame into the decoder.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError`] on a malformed control header or a mixed-type
    /// chunk set. Callers must treat this as fatal for the transport
    /// session: drop this `Reassembler` and close the connection.
    pub fn feed(&mut self, frame: Frame) -> Result<Decoded, ChunkError> {
        if !self.is_reassembling() {
            if let Frame::Text(text) = &frame {
                if let Some(body) = text.strip_prefix(CONTROL_PREFIX) {
                    let counts = parse_control_header(body)?;
                    self.pending = counts;
                    self.buffer.clear();
                    return Ok(Decoded::ControlConsumed);
                }
            }
            return Ok(Decoded::Passthrough(frame));
        }

        self.buffer.push(frame);
        let Some(&want) = self.pending.first() else {
            // Unreachable while `is_reassembling()` holds, kept defensive.
            return Ok(Decoded::Buffering);
        };
        if self.buffer.len() < want {
            return Ok(Decoded::Buffering);
        }

        let pieces = std::mem::take(&mut self.buffer);
        let reconstructed = concat_frames(pieces)?;
        self.pending.remove(0);
        Ok(Decoded::Complete(reconstructed))
    }
}

fn parse_control_header(body: &str) -> Result<Vec<usize>, ChunkError> {
    let ChunkCounts(raw) =
        serde_json::from_str(body).map_err(|e| ChunkError::MalformedHeader(e.to_string()))?;
    raw.into_iter()
        .map(|n| usize::try_from(n).map_err(|_| ChunkError::NonPositiveCount))
        .collect::<Result<Vec<_>, _>>()
        .and_then(|counts| {
            if counts.iter().any(|&c| c == 0) {
                Err(ChunkError::NonPositiveCount)
            } else {
                Ok(counts)
            }
        })
}

fn concat_frames(pieces: Vec<Frame>) -> Result<Frame, ChunkError> {
    if pieces.iter().all(|p| matches!(p, Frame::Text(_))) {
        let mut s = String::new();
        for p in pieces {
            if let Frame::Text(t) = p {
                s.push_str(&t);
            }
        }
        return Ok(Frame::Text(s));
    }
    if pieces.iter().all(|p| matches!(p, Frame::Binary(_))) {
        let mut b = Vec::new();
        for p in pieces {
            if let Frame::Binary(mut bytes) = p {
                b.append(&mut bytes);
            }
        }
        return Ok(Frame::Binary(b));
    }
    warn!("chunk reassembly received a mixed text/binary frame set");
    Err(ChunkError::MixedFrameTypes)
}

/// Round-trip a frame set through [`encode_frames`] then a [`Reassembler`],
/// returning the reconstructed frames in order. Intended for tests.
#[must_use]
pub fn decode_all(frames: &[Frame]) -> Vec<Frame> {
    let mut out = Vec::new();
    let mut reassembler = Reassembler::new();
    for frame in frames.iter().cloned() {
        match reassembler.feed(frame) {
            Ok(Decoded::Passthrough(f) | Decoded::Complete(f)) => out.push(f),
            Ok(Decoded::ControlConsumed | Decoded::Buffering) => {}
            Err(_) => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn round_trip_under_chunk_size_is_passthrough() {
        let frames = vec![Frame::Text("hello".to_owned())];
        let encoded = encode_frames(&frames, 1024);
        assert_eq!(encoded, frames);
    }

    #[rstest]
    #[case(4, 10)] // frame larger than chunk size gets chunked
    fn boundary_exactly_n_is_not_chunked(#[case] chunk_size: usize, #[case] _unused: usize) {
        let frame = Frame::Binary(vec![0u8; chunk_size]);
        let encoded = encode_frames(std::slice::from_ref(&frame), chunk_size);
        assert_eq!(encoded, vec![frame], "frame of length exactly N must not be chunked");
    }

    #[test]
    fn boundary_n_plus_one_splits_into_two_pieces() {
        let chunk_size = 4;
        let frame = Frame::Binary(vec![0u8; chunk_size + 1]);
        let encoded = encode_frames(std::slice::from_ref(&frame), chunk_size);
        // control frame + 2 pieces
        assert_eq!(encoded.len(), 3);
        assert_eq!(encoded[0], Frame::Text("C[2]".to_owned()));
        assert_eq!(encoded[1].len(), chunk_size);
        assert_eq!(encoded[2].len(), 1);
    }

    #[test]
    fn chunked_oversize_binary_round_trips() {
        let original = Frame::Binary((0u8..10).collect());
        let encoded = encode_frames(std::slice::from_ref(&original), 4);
        assert_eq!(encoded[0], Frame::Text("C[3]".to_owned()));
        assert_eq!(encoded.len(), 4);

        let decoded = decode_all(&encoded);
        assert_eq!(decoded, vec![original]);
    }

    #[test]
    fn multi_message_packet_round_trips() {
        let original = vec![
            Frame::Text("x".repeat(10)),
            Frame::Binary(vec![1u8; 7]),
        ];
        let encoded = encode_frames(&original, 3);
        let decoded = decode_all(&encoded);
        assert_eq!(decoded, original);
    }

    #[test]
    fn mixed_chunk_types_are_rejected() {
        let mut reassembler = Reassembler::new();
        reassembler.feed(Frame::Text("C[2]".to_owned())).expect("control frame");
        reassembler.feed(Frame::Text("a".to_owned())).expect("buffering");
        let err = reassembler
            .feed(Frame::Binary(vec![1]))
            .expect_err("mixed chunk types must error");
        assert_eq!(err, ChunkError::MixedFrameTypes);
    }

    #[test]
    fn non_positive_count_is_rejected() {
        let mut reassembler = Reassembler::new();
        let err = reassembler
            .feed(Frame::Text("C[0]".to_owned()))
            .expect_err("zero count must error");
        assert_eq!(err, ChunkError::NonPositiveCount);
    }

    #[test]
    fn malformed_header_is_rejected() {
        let mut reassembler = Reassembler::new();
        let err = reassembler
            .feed(Frame::Text("Cnotjson".to_owned()))
            .expect_err("malformed header must error");
        assert!(matches!(err, ChunkError::MalformedHeader(_)));
    }

    #[test]
    fn multi_byte_character_straddling_chunk_boundary_round_trips_exactly() {
        // '€' is 3 bytes (0xE2 0x82 0xAC); with chunk_size=3 it falls right
        // across where a byte-oriented splitter would cut it in half.
        let original = Frame::Text("ab€cd".to_owned());
        let encoded = encode_frames(std::slice::from_ref(&original), 3);
        let decoded = decode_all(&encoded);
        assert_eq!(decoded, vec![original]);

        // Every piece must itself be valid UTF-8 text, never a lossy
        // replacement character from a mid-character split.
        for frame in &encoded {
            if let Frame::Text(piece) = frame {
                assert!(!piece.contains('\u{FFFD}'), "piece corrupted by a mid-character split");
            }
        }
    }

    #[test]
    fn empty_frame_set_is_passthrough() {
        let frames: Vec<Frame> = vec![];
        assert_eq!(encode_frames(&frames, 10), frames);
    }
}
