#![allow(dead_code)]

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use rox::{Lox, Status};

/// In-memory `print` sink that the test keeps a handle to.
#[derive(Clone, Default)]
pub struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A session plus the buffer its `print` statements write into.
pub fn session() -> (Lox, SharedBuffer) {
    let buffer = SharedBuffer::default();
    let lox = Lox::with_output(Box::new(buffer.clone()));
    (lox, buffer)
}

/// Run `source` in a fresh session, returning status and printed output.
pub fn run(source: &str) -> (Status, String) {
    let (mut lox, buffer) = session();
    let status = lox.run(source);
    (status, buffer.contents())
}

/// Run `source`, which must succeed, and return its printed lines.
pub fn output_of(source: &str) -> Vec<String> {
    let (status, out) = run(source);
    assert!(status.is_success(), "expected success, got {:?}", status);
    out.lines().map(str::to_owned).collect()
}

/// Run `source`, which must fail at runtime, returning the error's display form.
pub fn runtime_error_of(source: &str) -> String {
    match run(source).0 {
        Status::RuntimeError(e) => e.to_string(),
        other => panic!("expected runtime error, got {:?}", other),
    }
}

/// Run `source`, which must fail statically, returning each rendered error.
pub fn compile_errors_of(source: &str) -> Vec<String> {
    match run(source).0 {
        Status::CompileError(errors) => errors.iter().map(|e| e.to_string()).collect(),
        other => panic!("expected compile error, got {:?}", other),
    }
}
