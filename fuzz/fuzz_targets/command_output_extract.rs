#![no_main]

use cellwatch_command::{extract_output_with_prefix, normalize_command_text};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);

    let normalized = normalize_command_text(&raw, "AT");
    assert!(normalized.to_ascii_uppercase().starts_with("AT"));
    assert_eq!(normalize_command_text(&normalized, "AT"), normalized);

    let output = extract_output_with_prefix(&raw, "AT");
    for line in output.lines() {
        assert!(!line.trim().is_empty());
        assert_ne!(line, "OK");
        assert_ne!(line, "ERROR");
        assert!(!line.to_ascii_uppercase().starts_with("AT"));
    }
});
