use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::io::{self, Write};
use std::rc::Rc;

use chrono::Utc;
use log::{debug, info};

use crate::callable::{Callable, LoxFunction, NativeFunction};
use crate::class::{LoxClass, LoxInstance};
use crate::environment::{EnvRef, Environment};
use crate::error::{LoxError, Result};
use crate::expr::{Expr, ExprId, LiteralValue};
use crate::stack::ensure_sufficient_stack;
use crate::stmt::{FunctionDecl, Stmt};
use crate::token::{Token, TokenType};
use crate::value::Value;

/// Deepest chain of nested Lox calls before `LoxError::StackOverflow`.
pub const MAX_CALL_DEPTH: usize = 2048;

/// How a statement finished. `Return` unwinds to the nearest function call.
#[derive(Debug)]
pub enum Flow {
    Normal,
    Return(Value),
}

pub struct Interpreter {
    globals: EnvRef,
    environment: EnvRef,
    /// Scope distances recorded by the resolver; absent ids are globals.
    locals: HashMap<ExprId, usize>,
    out: Box<dyn Write>,
    call_depth: usize,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// Creates an Interpreter printing to stdout.
    pub fn new() -> Self {
        Self::with_output(Box::new(io::stdout()))
    }

    /// Creates an Interpreter whose `print` statements write to `out`.
    pub fn with_output(out: Box<dyn Write>) -> Self {
        info!("Initializing Interpreter");

        let globals: EnvRef = Environment::new().into_ref();

        debug!("Defining native function 'clock'");

        globals.borrow_mut().define(
            "clock",
            Value::Callable(Callable::Native(Rc::new(NativeFunction {
                name: "clock",
                arity: 0,
                func: |_args: &[Value]| Ok(Value::Number(Utc::now().timestamp_millis() as f64)),
            }))),
        );

        Self {
            environment: Rc::clone(&globals),
            globals,
            locals: HashMap::new(),
            out,
            call_depth: 0,
        }
    }

    /// Called by the resolver: `id` is declared `depth` scopes out from its use.
    pub fn resolve(&mut self, id: ExprId, depth: usize) {
        self.locals.insert(id, depth);
    }

    /// Interprets a list of statements (a "program").
    ///
    /// The first runtime error stops the run; the environment is left as the
    /// top level so a later run can continue from the same globals.
    pub fn interpret(&mut self, statements: &[Stmt]) -> Result<()> {
        debug!("Interpreting {} statements", statements.len());

        let result: Result<()> = statements
            .iter()
            .try_for_each(|stmt| self.execute(stmt).map(|_| ()));

        self.environment = Rc::clone(&self.globals);
        self.call_depth = 0;
        self.out.flush()?;

        match &result {
            Ok(()) => info!("Interpretation completed successfully"),
            Err(e) => info!("Interpretation aborted: {}", e),
        }

        result
    }

    // ───────────────────────────── statements ──────────────────────────────

    /// Executes a single statement.
    pub fn execute(&mut self, stmt: &Stmt) -> Result<Flow> {
        ensure_sufficient_stack(|| self.execute_stmt(stmt))
    }

    fn execute_stmt(&mut self, stmt: &Stmt) -> Result<Flow> {
        match stmt {
            Stmt::Expression(expr) => {
                self.evaluate(expr)?;
            }

            Stmt::Print(expr) => {
                let value: Value = self.evaluate(expr)?;
                writeln!(self.out, "{}", value)?;
            }

            Stmt::Var { name, initializer } => {
                let value: Value = match initializer {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };

                debug!("Defining variable '{}'", name.lexeme);

                self.environment.borrow_mut().define(&name.lexeme, value);
            }

            Stmt::Block(statements) => {
                let env: EnvRef = Environment::with_enclosing(Rc::clone(&self.environment)).into_ref();

                return self.execute_block(statements, env);
            }

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    return self.execute(then_branch);
                } else if let Some(else_stmt) = else_branch {
                    return self.execute(else_stmt);
                }
            }

            Stmt::While { condition, body } => {
                while self.evaluate(condition)?.is_truthy() {
                    if let Flow::Return(value) = self.execute(body)? {
                        return Ok(Flow::Return(value));
                    }
                }
            }

            Stmt::Function(declaration) => {
                debug!("Defining function '{}'", declaration.name.lexeme);

                let function = LoxFunction::new(
                    Rc::clone(declaration),
                    Rc::clone(&self.environment),
                    false,
                );

                self.environment.borrow_mut().define(
                    &declaration.name.lexeme,
                    Value::Callable(Callable::Function(Rc::new(function))),
                );
            }

            Stmt::Return { value, .. } => {
                let value: Value = match value {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };

                return Ok(Flow::Return(value));
            }

            Stmt::Class {
                name,
                superclass,
                methods,
            } => self.define_class(name, superclass.as_ref(), methods)?,
        }

        Ok(Flow::Normal)
    }

    /// Run `statements` inside `environment`, restoring the current scope on
    /// every exit path (normal, `return`, or error).
    pub fn execute_block(&mut self, statements: &[Stmt], environment: EnvRef) -> Result<Flow> {
        let previous: EnvRef = std::mem::replace(&mut self.environment, environment);

        let result: Result<Flow> = self.execute_all(statements);

        self.environment = previous;

        result
    }

    fn execute_all(&mut self, statements: &[Stmt]) -> Result<Flow> {
        for stmt in statements {
            if let Flow::Return(value) = self.execute(stmt)? {
                return Ok(Flow::Return(value));
            }
        }

        Ok(Flow::Normal)
    }

    /// Two-step binding: the name exists (as nil) while methods are built,
    /// then receives the finished class.
    fn define_class(
        &mut self,
        name: &Token,
        superclass: Option<&Expr>,
        methods: &[Rc<FunctionDecl>],
    ) -> Result<()> {
        debug!("Defining class '{}'", name.lexeme);

        let superclass: Option<Rc<LoxClass>> = match superclass {
            Some(expr) => match self.evaluate(expr)? {
                Value::Callable(Callable::Class(class)) => Some(class),
                _ => {
                    let at: &Token = match expr {
                        Expr::Variable { name, .. } => name,
                        _ => name,
                    };

                    return Err(LoxError::runtime(at, "Superclass must be a class."));
                }
            },
            None => None,
        };

        self.environment
            .borrow_mut()
            .define(&name.lexeme, Value::Nil);

        // Methods of a subclass close over an extra scope holding `super`.
        let method_env: EnvRef = match &superclass {
            Some(parent) => {
                let mut env = Environment::with_enclosing(Rc::clone(&self.environment));
                env.define("super", Value::Callable(Callable::Class(Rc::clone(parent))));
                env.into_ref()
            }
            None => Rc::clone(&self.environment),
        };

        let methods: HashMap<String, Rc<LoxFunction>> = methods
            .iter()
            .map(|decl| {
                let is_initializer: bool = decl.name.lexeme == "init";
                let function = LoxFunction::new(Rc::clone(decl), Rc::clone(&method_env), is_initializer);

                (decl.name.lexeme.clone(), Rc::new(function))
            })
            .collect();

        let class = LoxClass::new(name.lexeme.clone(), superclass, methods);

        self.environment
            .borrow_mut()
            .assign(name, Value::Callable(Callable::Class(Rc::new(class))))
    }

    // ───────────────────────────── expressions ─────────────────────────────

    /// Evaluates an expression and returns a Value.
    pub fn evaluate(&mut self, expr: &Expr) -> Result<Value> {
        ensure_sufficient_stack(|| self.evaluate_expr(expr))
    }

    fn evaluate_expr(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Literal(literal) => Ok(match literal {
                LiteralValue::Number(n) => Value::Number(*n),
                LiteralValue::Str(s) => Value::from(s.as_str()),
                LiteralValue::True => Value::Bool(true),
                LiteralValue::False => Value::Bool(false),
                LiteralValue::Nil => Value::Nil,
            }),

            Expr::Grouping(inner) => self.evaluate(inner),

            Expr::Unary { operator, right } => self.evaluate_unary(operator, right),

            Expr::Binary {
                left,
                operator,
                right,
            } => {
                let left: Value = self.evaluate(left)?;
                let right: Value = self.evaluate(right)?;

                binary_op(operator, left, right)
            }

            Expr::Logical {
                left,
                operator,
                right,
            } => {
                let left: Value = self.evaluate(left)?;

                let short_circuit: bool = if operator.token_type == TokenType::OR {
                    left.is_truthy()
                } else {
                    !left.is_truthy()
                };

                if short_circuit {
                    Ok(left)
                } else {
                    self.evaluate(right)
                }
            }

            Expr::Ternary {
                condition,
                if_true,
                if_false,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.evaluate(if_true)
                } else {
                    self.evaluate(if_false)
                }
            }

            Expr::Variable { id, name } => self.look_up_variable(name, *id),

            Expr::Assign { id, name, value } => {
                let value: Value = self.evaluate(value)?;

                match self.locals.get(id) {
                    Some(&distance) => Environment::assign_at(
                        &self.environment,
                        distance,
                        &name.lexeme,
                        value.clone(),
                    )?,
                    None => self.globals.borrow_mut().assign(name, value.clone())?,
                }

                Ok(value)
            }

            Expr::Call {
                callee,
                paren,
                arguments,
            } => {
                let callee: Value = self.evaluate(callee)?;

                let mut values: Vec<Value> = Vec::with_capacity(arguments.len());
                for argument in arguments {
                    values.push(self.evaluate(argument)?);
                }

                match callee {
                    Value::Callable(callable) => self.call(&callable, paren, values),
                    _ => Err(LoxError::runtime(
                        paren,
                        "Can only call functions and classes.",
                    )),
                }
            }

            Expr::Get { object, name } => match self.evaluate(object)? {
                Value::Instance(instance) => LoxInstance::get(&instance, name),
                _ => Err(LoxError::runtime(name, "Only instances have properties.")),
            },

            Expr::Set {
                object,
                name,
                value,
            } => {
                let Value::Instance(instance) = self.evaluate(object)? else {
                    return Err(LoxError::runtime(name, "Only instances have fields."));
                };

                let value: Value = self.evaluate(value)?;
                instance.set(name, value.clone());

                Ok(value)
            }

            Expr::This { id, keyword } => self.look_up_variable(keyword, *id),

            Expr::Super {
                id,
                keyword,
                method,
            } => self.evaluate_super(*id, keyword, method),
        }
    }

    fn evaluate_unary(&mut self, operator: &Token, right: &Expr) -> Result<Value> {
        let right: Value = self.evaluate(right)?;

        match operator.token_type {
            TokenType::MINUS => match right {
                Value::Number(n) => Ok(Value::Number(-n)),
                _ => Err(LoxError::runtime(operator, "Operand must be a number.")),
            },

            TokenType::BANG => Ok(Value::Bool(!right.is_truthy())),

            _ => Err(LoxError::internal(format!(
                "invalid unary operator '{}'",
                operator.lexeme
            ))),
        }
    }

    /// `super.method` starts the lookup above the class that *defined* the
    /// running method, and binds the result to the current `this`.
    fn evaluate_super(&mut self, id: ExprId, keyword: &Token, method: &Token) -> Result<Value> {
        let distance: usize = *self
            .locals
            .get(&id)
            .ok_or_else(|| LoxError::internal("'super' was never resolved"))?;

        let Value::Callable(Callable::Class(superclass)) =
            Environment::get_at(&self.environment, distance, "super")?
        else {
            return Err(LoxError::internal("'super' is not bound to a class"));
        };

        let this_distance: usize = distance
            .checked_sub(1)
            .ok_or_else(|| LoxError::internal("'super' scope has no 'this' scope inside it"))?;

        let Value::Instance(object) = Environment::get_at(&self.environment, this_distance, "this")?
        else {
            return Err(LoxError::internal("'this' is not bound to an instance"));
        };

        let found: Rc<LoxFunction> = superclass.find_method(&method.lexeme).ok_or_else(|| {
            LoxError::runtime(method, format!("Undefined property '{}'.", method.lexeme))
        })?;

        debug!(
            "Resolved super.{} in '{}' at line {}",
            method.lexeme, superclass.name, keyword.line
        );

        Ok(Value::Callable(Callable::Function(Rc::new(found.bind(object)))))
    }

    fn look_up_variable(&self, name: &Token, id: ExprId) -> Result<Value> {
        match self.locals.get(&id) {
            Some(&distance) => Environment::get_at(&self.environment, distance, &name.lexeme),
            None => self.globals.borrow().get(name),
        }
    }

    /// Checks arity and call depth, then invokes `callee`.
    pub fn call(&mut self, callee: &Callable, paren: &Token, arguments: Vec<Value>) -> Result<Value> {
        if arguments.len() != callee.arity() {
            return Err(LoxError::runtime(
                paren,
                format!(
                    "Expected {} arguments but got {}.",
                    callee.arity(),
                    arguments.len()
                ),
            ));
        }

        if self.call_depth >= MAX_CALL_DEPTH {
            debug!("Call depth limit reached calling '{}'", callee.name());

            return Err(LoxError::StackOverflow { line: paren.line });
        }

        self.call_depth += 1;
        let result: Result<Value> = callee.call(self, paren, arguments);
        self.call_depth -= 1;

        result
    }
}

/// Closures point back at the scopes that hold them, so reference counting
/// alone never frees a session. Tearing down walks everything reachable from
/// the globals and empties each scope and instance, which breaks the cycles.
impl Drop for Interpreter {
    fn drop(&mut self) {
        let mut pending: Vec<EnvRef> = vec![Rc::clone(&self.globals), Rc::clone(&self.environment)];
        let mut values: Vec<Value> = Vec::new();

        // Held until the end so no address in `seen` can be reused.
        let mut cleared: Vec<EnvRef> = Vec::new();
        let mut seen: HashSet<*const RefCell<Environment>> = HashSet::new();

        loop {
            if let Some(value) = values.pop() {
                match value {
                    Value::Callable(Callable::Function(function)) => {
                        pending.push(Rc::clone(function.closure()));
                    }

                    Value::Callable(Callable::Class(class)) => {
                        pending.extend(class.methods().map(|m| Rc::clone(m.closure())));

                        if let Some(parent) = class.superclass() {
                            values.push(Value::Callable(Callable::Class(Rc::clone(parent))));
                        }
                    }

                    Value::Instance(instance) => {
                        values.extend(instance.take_fields());
                        values.push(Value::Callable(Callable::Class(Rc::clone(instance.class()))));
                    }

                    _ => {}
                }

                continue;
            }

            let Some(env) = pending.pop() else {
                break;
            };

            if !seen.insert(Rc::as_ptr(&env)) {
                continue;
            }

            let (bindings, enclosing) = env.borrow_mut().clear();
            values.extend(bindings);
            pending.extend(enclosing);
            cleared.push(env);
        }

        debug!("Interpreter dropped, cleared {} scope(s)", cleared.len());
    }
}

/// Arithmetic, comparison and equality on two evaluated operands.
fn binary_op(operator: &Token, left: Value, right: Value) -> Result<Value> {
    let numbers = |left: &Value, right: &Value| -> Result<(f64, f64)> {
        match (left, right) {
            (Value::Number(a), Value::Number(b)) => Ok((*a, *b)),
            _ => Err(LoxError::runtime(operator, "Operands must be numbers.")),
        }
    };

    match operator.token_type {
        TokenType::PLUS => match (&left, &right) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::String(a), Value::String(b)) => {
                let mut joined: String = String::with_capacity(a.len() + b.len());
                joined.push_str(a);
                joined.push_str(b);

                Ok(Value::String(Rc::from(joined)))
            }
            _ => Err(LoxError::runtime(
                operator,
                "Operands must be two numbers or strings.",
            )),
        },

        TokenType::MINUS => {
            let (a, b) = numbers(&left, &right)?;
            Ok(Value::Number(a - b))
        }

        TokenType::STAR => {
            let (a, b) = numbers(&left, &right)?;
            Ok(Value::Number(a * b))
        }

        TokenType::SLASH => {
            let (a, b) = numbers(&left, &right)?;

            if b == 0.0 {
                return Err(LoxError::runtime(operator, "Division by zero."));
            }

            Ok(Value::Number(a / b))
        }

        TokenType::GREATER => {
            let (a, b) = numbers(&left, &right)?;
            Ok(Value::Bool(a > b))
        }

        TokenType::GREATER_EQUAL => {
            let (a, b) = numbers(&left, &right)?;
            Ok(Value::Bool(a >= b))
        }

        TokenType::LESS => {
            let (a, b) = numbers(&left, &right)?;
            Ok(Value::Bool(a < b))
        }

        TokenType::LESS_EQUAL => {
            let (a, b) = numbers(&left, &right)?;
            Ok(Value::Bool(a <= b))
        }

        TokenType::EQUAL_EQUAL => Ok(Value::Bool(left == right)),

        TokenType::BANG_EQUAL => Ok(Value::Bool(left != right)),

        _ => Err(LoxError::internal(format!(
            "invalid binary operator '{}'",
            operator.lexeme
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ExprIds;
    use crate::parser::Parser;
    use crate::resolver::Resolver;
    use crate::scanner::scan_tokens;
    use std::rc::Weak;

    fn interpreter_running(source: &str) -> Interpreter {
        let mut interpreter = Interpreter::with_output(Box::new(io::sink()));
        let (tokens, errors) = scan_tokens(source);
        assert!(errors.is_empty(), "{:?}", errors);

        let mut ids = ExprIds::new();
        let statements = Parser::new(&tokens, &mut ids).parse().unwrap();
        Resolver::new(&mut interpreter).resolve(&statements).unwrap();
        interpreter.interpret(&statements).unwrap();

        interpreter
    }

    fn global(interpreter: &Interpreter, name: &str) -> Value {
        Environment::get_at(&interpreter.globals, 0, name).unwrap()
    }

    #[test]
    fn dropping_frees_globals_held_by_functions_and_classes() {
        let interpreter = interpreter_running("fun f() {} class A { m() {} }");
        let globals: Weak<RefCell<Environment>> = Rc::downgrade(&interpreter.globals);

        drop(interpreter);

        assert!(globals.upgrade().is_none());
    }

    #[test]
    fn dropping_frees_a_closure_stored_in_its_own_scope() {
        let interpreter = interpreter_running(
            "fun make() { var i = 0; fun count() { i = i + 1; return i; } return count; }
             var c = make();",
        );

        let scope: Weak<RefCell<Environment>> = match global(&interpreter, "c") {
            Value::Callable(Callable::Function(count)) => Rc::downgrade(count.closure()),
            other => panic!("expected a function, got {:?}", other),
        };

        drop(interpreter);

        assert!(scope.upgrade().is_none());
    }

    #[test]
    fn dropping_frees_instances_that_reference_themselves() {
        let interpreter = interpreter_running(
            "class Node { init() { this.me = this; this.show = this.init; } } var n = Node();",
        );

        let node: Weak<LoxInstance> = match global(&interpreter, "n") {
            Value::Instance(node) => Rc::downgrade(&node),
            other => panic!("expected an instance, got {:?}", other),
        };

        drop(interpreter);

        assert!(node.upgrade().is_none());
    }

    #[test]
    fn a_fresh_interpreter_drops_cleanly() {
        let interpreter = Interpreter::with_output(Box::new(io::sink()));
        let globals: Weak<RefCell<Environment>> = Rc::downgrade(&interpreter.globals);

        drop(interpreter);

        assert!(globals.upgrade().is_none());
    }
}
