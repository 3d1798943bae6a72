#![no_main]

use libfuzzer_sys::fuzz_target;
use sheetcrypt_cfb::CompoundFile;

/// Keep the harness itself bounded.
const MAX_INPUT_BYTES: usize = 4 * 1024 * 1024;

fuzz_target!(|data: &[u8]| {
    if data.len() > MAX_INPUT_BYTES {
        return;
    }

    let Ok(file) = CompoundFile::parse(data) else {
        return;
    };
    for (path, entry) in file.paths() {
        if entry.is_stream() {
            let _ = file.stream_chain(path);
            let _ = file.read_stream(path);
        }
    }
    let _ = file.streams();
});
