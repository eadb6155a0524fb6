//! Property tests for the frame codec and the receive accumulator.
//!
//! - Round trip: `decode(encode(f)) == f` for any valid frame
//! - Chunking invariance: the decoded sequence does not depend on how the
//!   byte stream is cut into reads

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use media_protocol::codec::{decode_frame, encode_frame};
use media_protocol::frame::{FrameShape, VideoFrame};
use media_protocol::framing::{encode_message, FrameAccumulator};
use proptest::prelude::*;

fn arb_frame() -> impl Strategy<Value = VideoFrame> {
    (1u32..=24, 1u32..=16, 1u8..=4)
        .prop_flat_map(|(width, height, channels)| {
            let len = (width * height) as usize * usize::from(channels);
            (
                Just(FrameShape::new(width, height, channels)),
                proptest::collection::vec(any::<u8>(), len),
            )
        })
        .prop_map(|(shape, pixels)| VideoFrame::new(shape, pixels).unwrap())
}

/// Split `len` bytes at the given (unsorted, possibly repeated) cut points.
fn chunk_bounds(len: usize, cuts: &[usize]) -> Vec<(usize, usize)> {
    let mut points: Vec<usize> = cuts.iter().map(|c| c % (len + 1)).collect();
    points.push(0);
    points.push(len);
    points.sort_unstable();
    points.dedup();
    points.windows(2).map(|w| (w[0], w[1])).collect()
}

proptest! {
    #[test]
    fn round_trip_is_exact(frame in arb_frame()) {
        let encoded = encode_frame(&frame).unwrap();
        let decoded = decode_frame(&mut encoded.clone()).unwrap();
        prop_assert_eq!(decoded, frame);
    }

    #[test]
    fn decoded_sequence_is_independent_of_chunking(
        frames in proptest::collection::vec(arb_frame(), 1..6),
        cuts in proptest::collection::vec(any::<usize>(), 0..40),
    ) {
        let mut wire = Vec::new();
        for frame in &frames {
            wire.extend_from_slice(&encode_message(frame).unwrap());
        }

        let mut acc = FrameAccumulator::default();
        let mut decoded = Vec::new();
        for (start, end) in chunk_bounds(wire.len(), &cuts) {
            acc.push(&wire[start..end]);
            while let Some(message) = acc.next_message().unwrap() {
                decoded.push(message.decode().unwrap());
            }
        }

        prop_assert_eq!(decoded, frames);
        prop_assert!(!acc.is_mid_message());
    }

    #[test]
    fn fixed_chunk_sizes_agree(
        frames in proptest::collection::vec(arb_frame(), 1..4),
        chunk in 1usize..600,
    ) {
        let mut wire = Vec::new();
        for frame in &frames {
            wire.extend_from_slice(&encode_message(frame).unwrap());
        }

        let mut acc = FrameAccumulator::default();
        let mut decoded = Vec::new();
        for piece in wire.chunks(chunk) {
            acc.push(piece);
            while let Some(message) = acc.next_message().unwrap() {
                decoded.push(message.decode().unwrap());
            }
        }

        prop_assert_eq!(decoded, frames);
    }
}
