#![no_main]

use libfuzzer_sys::fuzz_target;
use media_protocol::framing::FrameAccumulator;

fuzz_target!(|input: (Vec<u8>, u8)| {
    let (data, chunk) = input;
    let chunk = usize::from(chunk.max(1));

    // Small cap so oversized prefixes are exercised without huge allocations
    let mut acc = FrameAccumulator::new(64 * 1024);
    for piece in data.chunks(chunk) {
        acc.push(piece);
        loop {
            match acc.next_message() {
                Ok(Some(message)) => {
                    let _ = message.decode();
                }
                Ok(None) => break,
                Err(_) => return,
            }
        }
    }
});
