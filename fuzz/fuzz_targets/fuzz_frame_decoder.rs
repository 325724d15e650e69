//! Fuzz target: streaming frame decoder.
//!
//! Feeds arbitrary byte streams, in arbitrary chunkings, into the
//! decoder and verifies:
//! - No panics under any input
//! - Every emitted frame re-encodes to a well-formed wire frame
//!   (`len = 1 + |payload|`)
//! - Chunked and whole-stream feeding agree
//!
//! cargo fuzz run fuzz_frame_decoder

#![no_main]

use libfuzzer_sys::fuzz_target;
use meshgw::codec::{FrameDecoder, encode_frame};

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    // First byte drives the chunk size, rest is the stream.
    let chunk = usize::from(data[0]).max(1);
    let stream = &data[1..];

    let mut whole = FrameDecoder::new();
    let frames = whole.feed(stream);

    for frame in &frames {
        let encoded = encode_frame(frame.opcode, &frame.payload);
        assert_eq!(encoded[0] as usize, 1 + frame.payload.len());
        assert_eq!(encoded[1], frame.opcode);
    }

    let mut chunked = FrameDecoder::new();
    let mut chunked_frames = Vec::new();
    for part in stream.chunks(chunk) {
        chunked_frames.extend(chunked.feed(part));
    }
    assert_eq!(frames, chunked_frames);
});
