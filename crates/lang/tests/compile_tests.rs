//! 컴파일 파이프라인 통합 테스트
//!
//! 결정성, 프린터 왕복, 다중 에러 보고 등 파이프라인 전체에 걸친
//! 속성을 검증합니다.

use metrail_lang::checker::check;
use metrail_lang::compile;
use metrail_lang::lexer::lex;
use metrail_lang::parser::parse;
use metrail_lang::printer::print_source;
use metrail_lang::Instr;

const APACHE_LIKE: &str = "\
counter request_total by verb, code\n\
counter bytes_total\n\
histogram latency_ms buckets 1, 5, 25, 125 by verb\n\
const VERB /^(?P<verb>[A-Z]+) /\n\
VERB && /\" (\\d{3}) (\\d+) (\\d+)ms/ {\n\
  request_total[$verb, $1]++\n\
  bytes_total += strtol($2, 10)\n\
  latency_ms[$verb] = strtol($3, 10)\n\
}\n\
otherwise {\n\
  request_total[\"other\", \"0\"]++\n\
}\n";

#[test]
fn codegen_is_byte_identical_across_runs() {
    let a = compile("apache.mtl", APACHE_LIKE).unwrap();
    let b = compile("apache.mtl", APACHE_LIKE).unwrap();
    assert_eq!(a.disassemble(), b.disassemble());
    assert_eq!(a.digest, b.digest);
}

#[test]
fn digest_changes_with_source() {
    let a = compile("p.mtl", "counter a\n/x/ { a++ }\n").unwrap();
    let b = compile("p.mtl", "counter a\n/y/ { a++ }\n").unwrap();
    assert_ne!(a.digest, b.digest);
}

#[test]
fn printer_roundtrip_through_full_pipeline() {
    let ast = parse(lex(APACHE_LIKE).unwrap()).unwrap();
    let printed = print_source(&ast);

    // 출력도 유효한 프로그램이어야 하고 같은 바이트코드로 컴파일되어야 함
    let mut reparsed = parse(lex(&printed).unwrap()).unwrap();
    assert_eq!(print_source(&reparsed), printed);

    let symtab = check(&mut reparsed).unwrap();
    let prog =
        metrail_lang::codegen::codegen("apache.mtl", &printed, &reparsed, &symtab).unwrap();
    let direct = compile("apache.mtl", APACHE_LIKE).unwrap();
    assert_eq!(prog.instrs, direct.instrs);
}

#[test]
fn all_errors_surface_in_one_attempt() {
    let src = "counter c by host\n\
               /x/ { c[$1, $2]++ }\n\
               /y/ { unknown++ }\n\
               gauge c\n";
    let errs = compile("multi.mtl", src).unwrap_err();
    // 중복 메트릭 + 미정의 심볼 + 레이블 인자 수 + 캡처 범위
    assert!(errs.len() >= 3, "expected at least 3 errors, got:\n{errs}");
}

#[test]
fn scenario_programs_compile() {
    for src in [
        "counter lines_total\n/.*/ { lines_total++ }\n",
        "counter method_total by method\n/^(GET|POST) / { method_total[$1]++ }\n",
        "counter c\n/ts=(\\d+) / { settime(strtol($1, 10))\nc++ }\n",
        "counter c\n/n=(\\S+)/ { c += strtol($1, 10) }\n",
    ] {
        compile("scenario.mtl", src)
            .unwrap_or_else(|e| panic!("program failed to compile:\n{src}\n{e}"));
    }
}

#[test]
fn hidden_metrics_survive_to_descriptors() {
    let prog = compile(
        "state.mtl",
        "hidden gauge connected\n/up/ { connected = 1 }\n/down/ { connected = 0 }\n",
    )
    .unwrap();
    assert!(prog.metrics[0].hidden);
}

#[test]
fn regex_table_is_shared_between_cond_and_match() {
    let prog = compile(
        "share.mtl",
        "counter a\ncounter b\n/err/ { a++ }\n/info/ { $0 =~ /err/ { b++ } }\n",
    )
    .unwrap();
    assert_eq!(prog.regexes.len(), 2);
}

#[test]
fn metric_source_lines_point_at_declarations() {
    let prog = compile(
        "lines.mtl",
        "counter first\n\ncounter second\n/x/ { first++\nsecond++ }\n",
    )
    .unwrap();
    assert_eq!(prog.metrics[0].source_line, 1);
    assert_eq!(prog.metrics[1].source_line, 3);
}

#[test]
fn halt_terminates_every_program() {
    let prog = compile("empty.mtl", "counter unused\n").unwrap();
    assert_eq!(*prog.instrs.last().unwrap(), Instr::Halt);
}
