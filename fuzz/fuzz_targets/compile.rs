#![no_main]

use libfuzzer_sys::fuzz_target;
use metrail_lang::compile;

fuzz_target!(|data: &[u8]| {
    if let Ok(src) = std::str::from_utf8(data) {
        // 전체 파이프라인: 렉서 -> 파서 -> 체커 -> 코드 생성
        let _ = compile("fuzz.mtl", src);
    }
});
