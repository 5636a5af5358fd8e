#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(yaml) = std::str::from_utf8(data) {
        // The tolerant parser must never panic and never yield empty
        // patterns, whatever the input looks like.
        let patterns = genie_workspace::parse_workspace_packages(yaml);
        assert!(patterns.iter().all(|p| !p.is_empty()));
    }
});
