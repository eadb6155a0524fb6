#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use media_protocol::codec::{decode_frame, encode_frame};

fuzz_target!(|data: &[u8]| {
    // Decoding arbitrary bytes must never panic, only return Err
    let buf = Bytes::copy_from_slice(data);

    if let Ok(frame) = decode_frame(&mut buf.clone()) {
        // Anything that decodes re-encodes to an equivalent payload: same
        // length and pixels, reserved header bytes zeroed
        let encoded = encode_frame(&frame).unwrap();
        assert_eq!(encoded.len(), data.len());
        assert_eq!(&encoded[16..], &data[16..]);
    }
});
