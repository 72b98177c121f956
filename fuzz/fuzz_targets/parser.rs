#![no_main]

use libfuzzer_sys::fuzz_target;
use metrail_lang::{lexer, parser};

fuzz_target!(|data: &[u8]| {
    if let Ok(src) = std::str::from_utf8(data) {
        if let Ok(tokens) = lexer::lex(src) {
            // 어떤 토큰 시퀀스에도 패닉하지 않아야 한다
            let _ = parser::parse(tokens);
        }
    }
});
