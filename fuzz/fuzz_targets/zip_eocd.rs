//! Fuzz the ZIP end-of-central-directory scan and directory walk.
//!
//! Both must reject arbitrary bytes with `InvalidInput` rather than panic
//! or read out of bounds.

#![no_main]

use libfuzzer_sys::fuzz_target;
use polymix_core::modules::zip;

fuzz_target!(|data: &[u8]| {
    if let Ok(eocd) = zip::find_eocd(data) {
        let _ = zip::read_entries(data, &eocd);
    }
});
