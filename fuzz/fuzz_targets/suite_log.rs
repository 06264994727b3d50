#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let all = rtstats::log_parser::parse_all(&text);
    let last = rtstats::log_parser::parse(&text);
    assert_eq!(last, all.last().copied());
});
