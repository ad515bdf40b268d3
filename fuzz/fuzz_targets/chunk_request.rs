//! Fuzz the chunk request line parser

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(line) = std::str::from_utf8(data) {
        if let Ok(index) = bt_core::protocol::parse_request_line(line) {
            let echoed = bt_core::protocol::parse_request_line(&format!("{index}\n"));
            assert_eq!(echoed.ok(), Some(index));
        }
    }
});
