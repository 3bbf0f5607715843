#![no_main]
use libfuzzer_sys::fuzz_target;
use mcraw_parse::{ParseOptions, decode_record};

fuzz_target!(|data: &[u8]| {
    let strict = decode_record(data, &ParseOptions::default());
    let lenient = decode_record(data, &ParseOptions::default().lenient(true));
    // Anything that decodes strictly decodes the same way leniently.
    if let Ok(doc) = strict {
        assert_eq!(lenient.ok(), Some(doc));
    }
});
