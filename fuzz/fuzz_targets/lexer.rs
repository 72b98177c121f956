#![no_main]

use libfuzzer_sys::fuzz_target;
use metrail_lang::lexer;

fuzz_target!(|data: &[u8]| {
    if let Ok(src) = std::str::from_utf8(data) {
        // 크래시나 패닉 없이 Ok 또는 Err을 반환해야 한다
        let _ = lexer::lex(src);
    }
});
