#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(raw) = std::str::from_utf8(data) {
        let enriched = genie_content::enrich_genie_marker(raw, "package.json.genie.ts");
        // Valid JSON objects stay valid; everything else passes through
        // untouched.
        if serde_json::from_str::<serde_json::Value>(raw).is_ok() {
            let _: serde_json::Value =
                serde_json::from_str(&enriched).expect("enriched output must stay valid JSON");
        } else {
            assert_eq!(enriched, raw);
        }
    }
});
