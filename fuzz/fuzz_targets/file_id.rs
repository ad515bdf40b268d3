//! Fuzz file ID parsing and content addressing

#![no_main]

use bt_files::{ContentId, FileId};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(id) = FileId::parse(s) {
            let cid = ContentId::for_file(&id);
            assert_eq!(cid.digest().len(), 32);
        }
    }
});
