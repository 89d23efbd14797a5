use rox::ast_printer::AstPrinter;
use rox::Lox;

fn parse_ok(source: &str) -> Vec<String> {
    let statements = Lox::new()
        .parse(source)
        .unwrap_or_else(|errors| panic!("unexpected parse errors: {:?}", errors));

    statements.iter().map(AstPrinter::print_stmt).collect()
}

fn parse_one(source: &str) -> String {
    let mut printed = parse_ok(source);
    assert_eq!(printed.len(), 1, "expected one statement in {:?}", printed);
    printed.remove(0)
}

fn parse_errors(source: &str) -> Vec<String> {
    match Lox::new().parse(source) {
        Ok(statements) => panic!("expected errors, parsed {} statement(s)", statements.len()),
        Err(errors) => errors.iter().map(|e| e.to_string()).collect(),
    }
}

#[test]
fn factor_binds_tighter_than_term() {
    assert_eq!(parse_one("1 + 2 * 3;"), "(; (+ 1.0 (* 2.0 3.0)))");
    assert_eq!(parse_one("(1 + 2) * 3;"), "(; (* (group (+ 1.0 2.0)) 3.0))");
    assert_eq!(parse_one("1 - 2 - 3;"), "(; (- (- 1.0 2.0) 3.0))");
}

#[test]
fn comparison_and_equality_levels() {
    assert_eq!(
        parse_one("1 < 2 == 3 >= 4;"),
        "(; (== (< 1.0 2.0) (>= 3.0 4.0)))"
    );
}

#[test]
fn unary_operators_nest() {
    assert_eq!(parse_one("!!true;"), "(; (! (! true)))");
    assert_eq!(parse_one("-(-1);"), "(; (- (group (- 1.0))))");
    assert_eq!(parse_one("-a * b;"), "(; (* (- a) b))");
}

#[test]
fn ternary_is_right_associative() {
    assert_eq!(parse_one("a ? b : c ? d : e;"), "(; (?: a b (?: c d e)))");
}

#[test]
fn ternary_sits_between_logic_and_equality() {
    assert_eq!(parse_one("a == b ? c : d;"), "(; (?: (== a b) c d))");
    assert_eq!(parse_one("a or b ? c : d;"), "(; (or a (?: b c d)))");
    assert_eq!(parse_one("a and b ? c : d;"), "(; (and a (?: b c d)))");
}

#[test]
fn ternary_middle_branch_is_a_full_expression() {
    assert_eq!(parse_one("a ? b = 1 : c;"), "(; (?: a (= b 1.0) c))");
}

#[test]
fn ternary_without_colon_is_an_error() {
    assert_eq!(
        parse_errors("a ? b;"),
        vec!["[line 1] Error at ';': Expected ':' after then branch of '?'."]
    );
}

#[test]
fn assignment_is_right_associative() {
    assert_eq!(parse_one("a = b = 1;"), "(; (= a (= b 1.0)))");
}

#[test]
fn property_chains_and_calls() {
    assert_eq!(parse_one("a.b.c = 1;"), "(; (= (. (. a b) c) 1.0))");
    assert_eq!(parse_one("f(1)(2);"), "(; (call (call f 1.0) 2.0))");
    assert_eq!(parse_one("a.b(c, d);"), "(; (call (. a b) c d))");
}

#[test]
fn for_loop_desugars_to_while() {
    assert_eq!(
        parse_one("for (var i = 0; i < 3; i = i + 1) print i;"),
        "(block (var i 0.0) (while (< i 3.0) (block (print i) (; (= i (+ i 1.0))))))"
    );
}

#[test]
fn for_loop_with_empty_clauses_loops_on_true() {
    assert_eq!(parse_one("for (;;) print 1;"), "(while true (print 1.0))");
}

#[test]
fn statements_print_in_prefix_form() {
    assert_eq!(
        parse_ok("var a; var b = \"s\"; if (a) print a; else { b; } while (a) a = nil;"),
        vec![
            "(var a)",
            "(var b s)",
            "(if a (print a) (block (; b)))",
            "(while a (; (= a nil)))",
        ]
    );
}

#[test]
fn functions_and_returns() {
    assert_eq!(
        parse_one("fun add(a, b) { return a + b; }"),
        "(fun add (a b) (return (+ a b)))"
    );
    assert_eq!(parse_one("fun f() { return; }"), "(fun f () (return))");
}

#[test]
fn class_with_superclass_and_super_call() {
    assert_eq!(
        parse_one("class B < A { init(x) { this.x = x; } m() { return super.m(); } }"),
        "(class B < A (fun init (x) (; (= (. this x) x))) (fun m () (return (call (super m)))))"
    );
}

#[test]
fn super_requires_a_method_name() {
    assert_eq!(
        parse_errors("super;"),
        vec!["[line 1] Error at ';': Expected '.' after 'super'."]
    );
}

#[test]
fn missing_semicolon_is_reported_at_end() {
    assert_eq!(
        parse_errors("print 1"),
        vec!["[line 1] Error at end: Expected ';' after value."]
    );
}

#[test]
fn invalid_assignment_target_does_not_stop_the_parse() {
    // Only one error: the statement and the one after it still parse.
    assert_eq!(
        parse_errors("1 = 2;\nprint 3 +;"),
        vec![
            "[line 1] Error at '=': Invalid assignment target.",
            "[line 2] Error at ';': Expected expression.",
        ]
    );

    assert_eq!(
        parse_errors("a + b = c;"),
        vec!["[line 1] Error at '=': Invalid assignment target."]
    );
}

#[test]
fn errors_are_batched_after_synchronizing() {
    let errors = parse_errors("print ;\nvar = 1;\nprint 2;\nfun (){}");

    assert_eq!(
        errors,
        vec![
            "[line 1] Error at ';': Expected expression.",
            "[line 2] Error at '=': Expected variable name.",
            "[line 4] Error at '(': Expected function name.",
        ]
    );
}

#[test]
fn lexical_and_syntax_errors_are_merged_by_line() {
    assert_eq!(
        parse_errors("print ;\n@"),
        vec![
            "[line 1] Error at ';': Expected expression.",
            "[line 2] Error: Unexpected character: @",
        ]
    );
}

#[test]
fn lexical_error_alone_still_fails_the_parse() {
    assert_eq!(
        parse_errors("print 1; #"),
        vec!["[line 1] Error: Unexpected character: #"]
    );
}

#[test]
fn more_than_255_arguments_is_reported_once() {
    let args: Vec<&str> = vec!["0"; 256];
    let source = format!("f({});", args.join(", "));

    assert_eq!(
        parse_errors(&source),
        vec!["[line 1] Error at '0': Can't have more than 255 arguments."]
    );

    let ok: Vec<&str> = vec!["0"; 255];
    assert_eq!(parse_ok(&format!("f({});", ok.join(", "))).len(), 1);
}

#[test]
fn more_than_255_parameters_is_reported() {
    let params: Vec<String> = (0..256).map(|i| format!("p{}", i)).collect();
    let source = format!("fun f({}) {{}}", params.join(", "));

    assert_eq!(
        parse_errors(&source),
        vec!["[line 1] Error at 'p255': Can't have more than 255 parameters."]
    );
}

#[test]
fn deeply_nested_groupings_parse() {
    let depth = 1_000;
    let source = format!("{}1{};", "(".repeat(depth), ")".repeat(depth));

    assert_eq!(parse_ok(&source).len(), 1);
}
