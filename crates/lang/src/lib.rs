#![doc = include_str!("../README.md")]

pub mod ast;
pub mod bytecode;
pub mod checker;
pub mod codegen;
pub mod compile;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod printer;
pub mod span;
pub mod symtab;
pub mod types;

// --- 주요 타입 re-export ---

pub use bytecode::{CompiledRegex, Instr, MetricDescriptor, Program};
pub use compile::compile;
pub use error::{CompileError, CompileErrors};
pub use span::Span;
pub use types::Type;
