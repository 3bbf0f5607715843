#![no_main]
use libfuzzer_sys::fuzz_target;
use mcraw_parse::{DecodeConfig, Decoder};
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    let config = DecodeConfig::default()
        .with_max_frames(4096)
        .with_max_record_size(1 << 20)
        .lenient(data.first().is_some_and(|b| b & 1 == 1));
    let Ok(decoder) = Decoder::from_reader_with_config(Cursor::new(data), &config) else {
        return;
    };
    let _ = decoder.container_metadata().to_json();
    for (timestamp, metadata) in decoder.frame_metadata() {
        assert!(decoder.frame(timestamp).is_some());
        if let Ok(metadata) = metadata {
            let _ = metadata.to_json();
        }
    }
});
