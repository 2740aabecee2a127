#![no_main]

use libfuzzer_sys::fuzz_target;
use vst2_host::persistence::fuzz_parse_preset;

fuzz_target!(|data: &[u8]| {
    fuzz_parse_preset(data);
});
