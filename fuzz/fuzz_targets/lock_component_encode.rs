#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(raw) = std::str::from_utf8(data) {
        let encoded = genie_lock::encode_component(raw);
        // Encoded components are single ASCII path segments.
        assert!(encoded.is_ascii());
        assert!(!encoded.contains('/'));
        assert!(!encoded.contains('\\'));
    }
});
