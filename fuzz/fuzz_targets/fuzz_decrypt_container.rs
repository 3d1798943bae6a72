#![no_main]

use libfuzzer_sys::fuzz_target;
use sheetcrypt::{DecryptOptions, EncryptionInfo};

const MAX_INPUT_BYTES: usize = 1024 * 1024;

fuzz_target!(|data: &[u8]| {
    if data.len() > MAX_INPUT_BYTES {
        return;
    }

    // A bare descriptor first: most interesting inputs are `EncryptionInfo` streams.
    let _ = EncryptionInfo::parse(data);

    // Then the whole container pipeline. Keep the password hash cheap so the fuzzer spends its
    // time on parsing rather than in SHA-512.
    let opts = DecryptOptions {
        verify_integrity: data.first().is_some_and(|b| b & 1 == 0),
        max_spin_count: 64,
    };
    let _ = sheetcrypt::inspect(data);
    let _ = sheetcrypt::decrypt_with_options(data, "password", &opts);
});
