//! Fuzz testing for `Authorization` header parsing.
//!
//! Checks that `parse_bearer` never panics and that any token it returns is
//! non-empty, free of whitespace and a substring of the input.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_bearer -- -max_total_time=60
//! ```

#![no_main]

use keygate::middleware::parse_bearer;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Some(token) = parse_bearer(s) {
            assert!(!token.is_empty());
            assert!(!token.contains(char::is_whitespace));
            assert!(s.contains(token));
        }
    }
});
