#![no_main]

use libfuzzer_sys::fuzz_target;

use genie_types::Event;

fuzz_target!(|data: &[u8]| {
    if let Ok(json) = std::str::from_utf8(data) {
        if let Ok(event) = serde_json::from_str::<Event>(json) {
            let serialized = serde_json::to_string(&event).expect("serialize");
            let _: Event = serde_json::from_str(&serialized).expect("roundtrip");
        }
    }
});
