mod common;

use common::{compile_errors_of, output_of, run};
use rox::Status;

#[test]
fn duplicate_local_in_one_scope_is_an_error() {
    assert_eq!(
        compile_errors_of("{ var a = 1; var a = 2; }"),
        vec!["[line 1] Error at 'a': Already a variable with this name in this scope."]
    );
}

#[test]
fn duplicate_parameter_is_an_error() {
    assert_eq!(
        compile_errors_of("fun f(a, a) {}"),
        vec!["[line 1] Error at 'a': Already a variable with this name in this scope."]
    );
}

#[test]
fn shadowing_in_a_nested_scope_is_allowed() {
    assert_eq!(
        output_of("var a = \"outer\"; { var a = \"inner\"; print a; } print a;"),
        vec!["inner", "outer"]
    );
}

#[test]
fn redeclaring_a_global_is_allowed() {
    assert_eq!(output_of("var a = 1; var a = 2; print a;"), vec!["2"]);
}

#[test]
fn reading_a_local_in_its_own_initializer() {
    assert_eq!(
        compile_errors_of("var a = 1; { var a = a; }"),
        vec!["[line 1] Error at 'a': Can't read local variable in its own initializer."]
    );
}

#[test]
fn global_initializer_may_read_the_previous_global() {
    assert_eq!(output_of("var a = 1; var a = a + 1; print a;"), vec!["2"]);
}

#[test]
fn return_outside_a_function() {
    assert_eq!(
        compile_errors_of("return 1;"),
        vec!["[line 1] Error at 'return': Can't return from top-level code."]
    );
}

#[test]
fn returning_a_value_from_an_initializer() {
    assert_eq!(
        compile_errors_of("class A {\n  init() { return 1; }\n}"),
        vec!["[line 2] Error at 'return': Can't return a value from an initializer."]
    );
}

#[test]
fn bare_return_in_an_initializer_is_allowed() {
    assert_eq!(
        output_of("class A { init() { return; } } print A();"),
        vec!["A instance"]
    );
}

#[test]
fn this_outside_a_class() {
    assert_eq!(
        compile_errors_of("print this;"),
        vec!["[line 1] Error at 'this': Can't use 'this' outside of a class."]
    );

    assert_eq!(
        compile_errors_of("fun f() { return this; }"),
        vec!["[line 1] Error at 'this': Can't use 'this' outside of a class."]
    );
}

#[test]
fn super_outside_a_class() {
    assert_eq!(
        compile_errors_of("super.m();"),
        vec!["[line 1] Error at 'super': Can't use 'super' outside of a class."]
    );
}

#[test]
fn super_without_a_superclass() {
    assert_eq!(
        compile_errors_of("class A { m() { super.m(); } }"),
        vec!["[line 1] Error at 'super': Can't use 'super' in a class with no superclass."]
    );
}

#[test]
fn class_inheriting_from_itself() {
    assert_eq!(
        compile_errors_of("class A < A {}"),
        vec!["[line 1] Error at 'A': A class can't inherit from itself."]
    );
}

#[test]
fn all_static_errors_are_reported_and_nothing_runs() {
    let source = "print \"before\";\n\
                  { var a; var a; }\n\
                  return;\n\
                  print this;";

    let (status, out) = run(source);

    let Status::CompileError(errors) = &status else {
        panic!("expected compile error, got {:?}", status);
    };

    let rendered: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    assert_eq!(
        rendered,
        vec![
            "[line 2] Error at 'a': Already a variable with this name in this scope.",
            "[line 3] Error at 'return': Can't return from top-level code.",
            "[line 4] Error at 'this': Can't use 'this' outside of a class.",
        ]
    );

    assert!(out.is_empty(), "nothing should execute, got {:?}", out);
    assert_eq!(status.exit_code(), 65);
}

#[test]
fn closures_bind_to_the_scope_seen_at_resolution() {
    // The inner `a` must keep referring to the global even after a local
    // with the same name is declared later in the block.
    let source = r#"
        var a = "global";
        {
            fun showA() { print a; }
            showA();
            var a = "block";
            showA();
        }
    "#;

    assert_eq!(output_of(source), vec!["global", "global"]);
}

#[test]
fn sibling_functions_resolve_independently() {
    let source = r#"
        fun outer() {
            var x = "outer";
            fun a() { return x; }
            fun b() { var x = "b"; return x; }
            print a();
            print b();
        }
        outer();
    "#;

    assert_eq!(output_of(source), vec!["outer", "b"]);
}
