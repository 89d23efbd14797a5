//! `rox`: a tree-walking interpreter for Lox.
//!
//! The pipeline is scanner → parser → resolver → interpreter. [`Lox`] wires
//! the stages together and keeps interpreter state alive between runs, which
//! is what a REPL needs.

pub mod ast_printer;
pub mod callable;
pub mod class;
pub mod environment;
pub mod error;
pub mod expr;
pub mod interpreter;
pub mod parser;
pub mod resolver;
pub mod scanner;
pub mod stack;
pub mod stmt;
pub mod token;
pub mod value;

use std::io::Write;

use log::info;

use crate::error::LoxError;
use crate::expr::ExprIds;
use crate::interpreter::Interpreter;
use crate::parser::Parser;
use crate::resolver::Resolver;
use crate::stmt::Stmt;

/// Outcome of one [`Lox::run`].
#[derive(Debug)]
pub enum Status {
    Success,

    /// Lex, parse or resolve errors, ordered by line. Nothing was executed.
    CompileError(Vec<LoxError>),

    /// Execution started and stopped at this error.
    RuntimeError(LoxError),
}

impl Status {
    /// Conventional process exit code: 0, 65 (data error) or 70 (software error).
    pub fn exit_code(&self) -> i32 {
        match self {
            Status::Success => 0,
            Status::CompileError(_) => 65,
            Status::RuntimeError(_) => 70,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Status::Success)
    }
}

/// An interpreter session. Globals persist from one `run` to the next.
pub struct Lox {
    interpreter: Interpreter,
    ids: ExprIds,
}

impl Default for Lox {
    fn default() -> Self {
        Self::new()
    }
}

impl Lox {
    /// A session printing to stdout.
    pub fn new() -> Self {
        Self {
            interpreter: Interpreter::new(),
            ids: ExprIds::new(),
        }
    }

    /// A session whose `print` output goes to `out`.
    pub fn with_output(out: Box<dyn Write>) -> Self {
        Self {
            interpreter: Interpreter::with_output(out),
            ids: ExprIds::new(),
        }
    }

    /// Scan and parse `source`, batching every lexical and syntax error.
    pub fn parse(&mut self, source: &str) -> Result<Vec<Stmt>, Vec<LoxError>> {
        let (tokens, mut errors) = scanner::scan_tokens(source);

        match Parser::new(&tokens, &mut self.ids).parse() {
            Ok(statements) if errors.is_empty() => Ok(statements),
            Ok(_) => Err(errors),
            Err(parse_errors) => {
                errors.extend(parse_errors);
                errors.sort_by_key(|e| e.line());
                Err(errors)
            }
        }
    }

    /// Resolve and interpret already-parsed statements.
    pub fn execute(&mut self, statements: &[Stmt]) -> Status {
        if let Err(errors) = Resolver::new(&mut self.interpreter).resolve(statements) {
            return Status::CompileError(errors);
        }

        match self.interpreter.interpret(statements) {
            Ok(()) => Status::Success,
            Err(e) => Status::RuntimeError(e),
        }
    }

    /// The whole pipeline on one piece of source text.
    pub fn run(&mut self, source: &str) -> Status {
        info!("Running {} bytes of source", source.len());

        match self.parse(source) {
            Ok(statements) => self.execute(&statements),
            Err(errors) => Status::CompileError(errors),
        }
    }
}
