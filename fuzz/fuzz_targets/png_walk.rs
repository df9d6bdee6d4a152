//! Fuzz the PNG chunk walker against arbitrary byte sequences.

#![no_main]

use libfuzzer_sys::fuzz_target;
use polymix_core::modules::png;

fuzz_target!(|data: &[u8]| {
    let _ = png::walk_chunks(data);
});
