#![no_main]

use libfuzzer_sys::fuzz_target;

use genie_module::{GeneratorContext, interpolate};

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let ctx = GeneratorContext {
            cwd: "/repo".into(),
            location: "packages/app".to_string(),
            workspace: None,
        };
        // Interpolation is total over arbitrary input, including unbalanced
        // braces and unknown keys.
        let _ = interpolate(text, &ctx);
    }
});
