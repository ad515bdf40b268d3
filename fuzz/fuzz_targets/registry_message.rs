//! Fuzz registry datagram decoding

#![no_main]

use bt_discovery::registry::RegistryMessage;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(msg) = RegistryMessage::from_bytes(data) {
        let _ = msg.to_bytes();
        let _ = msg.request_id();
    }
});
