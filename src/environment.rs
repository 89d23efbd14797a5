use crate::error::{LoxError, Result};
use crate::token::Token;
use crate::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Shared handle to a scope. Closures and active calls each hold one.
pub type EnvRef = Rc<RefCell<Environment>>;

/// One scope in the chain: its own bindings plus a link to the scope around it.
#[derive(Default)]
pub struct Environment {
    values: HashMap<String, Value>,
    enclosing: Option<EnvRef>,
}

impl Environment {
    pub fn new() -> Self {
        Environment {
            values: HashMap::new(),
            enclosing: None,
        }
    }

    pub fn with_enclosing(enclosing: EnvRef) -> Self {
        Environment {
            values: HashMap::new(),
            enclosing: Some(enclosing),
        }
    }

    /// Wrap into a shared handle.
    pub fn into_ref(self) -> EnvRef {
        Rc::new(RefCell::new(self))
    }

    /// Empty the scope and cut its outward link, handing both back.
    ///
    /// Used at session teardown: a closure stored in the scope it closes over
    /// keeps that scope alive until someone clears it.
    pub fn clear(&mut self) -> (Vec<Value>, Option<EnvRef>) {
        let values: Vec<Value> = self.values.drain().map(|(_, value)| value).collect();

        (values, self.enclosing.take())
    }

    /// Insert or overwrite. Redefinition is never an error here.
    pub fn define(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &Token) -> Result<Value> {
        if let Some(value) = self.values.get(&name.lexeme) {
            Ok(value.clone())
        } else if let Some(enclosing) = &self.enclosing {
            enclosing.borrow().get(name)
        } else {
            Err(LoxError::runtime(
                name,
                format!("Undefined variable '{}'.", name.lexeme),
            ))
        }
    }

    /// Mutate the nearest scope that already binds `name`; never creates one.
    pub fn assign(&mut self, name: &Token, value: Value) -> Result<()> {
        if let Some(slot) = self.values.get_mut(&name.lexeme) {
            *slot = value;
            Ok(())
        } else if let Some(enclosing) = &self.enclosing {
            enclosing.borrow_mut().assign(name, value)
        } else {
            Err(LoxError::runtime(
                name,
                format!("Undefined variable '{}'.", name.lexeme),
            ))
        }
    }

    /// Walk exactly `distance` enclosing links from `env`.
    fn ancestor(env: &EnvRef, distance: usize) -> Result<EnvRef> {
        let mut current: EnvRef = Rc::clone(env);

        for hop in 0..distance {
            let next: Option<EnvRef> = current.borrow().enclosing.clone();

            current = next.ok_or_else(|| {
                LoxError::internal(format!(
                    "scope chain ended after {} of {} hops",
                    hop, distance
                ))
            })?;
        }

        Ok(current)
    }

    /// Resolved read: the binding must exist exactly `distance` scopes out.
    pub fn get_at(env: &EnvRef, distance: usize, name: &str) -> Result<Value> {
        let scope: EnvRef = Self::ancestor(env, distance)?;
        let value: Option<Value> = scope.borrow().values.get(name).cloned();

        value.ok_or_else(|| {
            LoxError::internal(format!("'{}' not bound at distance {}", name, distance))
        })
    }

    /// Resolved write: the binding must exist exactly `distance` scopes out.
    pub fn assign_at(env: &EnvRef, distance: usize, name: &str, value: Value) -> Result<()> {
        let target: EnvRef = Self::ancestor(env, distance)?;
        let mut scope = target.borrow_mut();

        match scope.values.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(LoxError::internal(format!(
                "'{}' not bound at distance {}",
                name, distance
            ))),
        }
    }
}

// Bindings can hold closures that point back at this scope, so only names are printed.
impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.values.keys().collect();
        names.sort();

        f.debug_struct("Environment")
            .field("names", &names)
            .field("has_enclosing", &self.enclosing.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> Token {
        Token::synthetic(name, 1)
    }

    #[test]
    fn get_falls_back_to_enclosing() {
        let global: EnvRef = Environment::new().into_ref();
        global.borrow_mut().define("a", Value::Number(1.0));

        let inner = Environment::with_enclosing(Rc::clone(&global));

        assert_eq!(inner.get(&ident("a")).unwrap(), Value::Number(1.0));
        assert!(inner.get(&ident("b")).is_err());
    }

    #[test]
    fn assign_never_creates_a_binding() {
        let mut env = Environment::new();

        let err = env.assign(&ident("x"), Value::Nil).unwrap_err();
        assert_eq!(err.message(), "Undefined variable 'x'.");
    }

    #[test]
    fn assign_updates_the_nearest_binding() {
        let global: EnvRef = Environment::new().into_ref();
        global.borrow_mut().define("a", Value::Number(1.0));

        let inner: EnvRef = Environment::with_enclosing(Rc::clone(&global)).into_ref();
        inner
            .borrow_mut()
            .assign(&ident("a"), Value::Number(2.0))
            .unwrap();

        assert_eq!(
            Environment::get_at(&global, 0, "a").unwrap(),
            Value::Number(2.0)
        );
    }

    #[test]
    fn distance_lookups_hit_exact_scope() {
        let outer: EnvRef = Environment::new().into_ref();
        outer.borrow_mut().define("a", Value::from("outer"));

        let inner: EnvRef = Environment::with_enclosing(Rc::clone(&outer)).into_ref();
        inner.borrow_mut().define("a", Value::from("inner"));

        assert_eq!(
            Environment::get_at(&inner, 1, "a").unwrap(),
            Value::from("outer")
        );

        Environment::assign_at(&inner, 1, "a", Value::Nil).unwrap();
        assert_eq!(Environment::get_at(&outer, 0, "a").unwrap(), Value::Nil);
        assert_eq!(
            Environment::get_at(&inner, 0, "a").unwrap(),
            Value::from("inner")
        );
    }

    #[test]
    fn bad_distance_is_an_internal_error() {
        let env: EnvRef = Environment::new().into_ref();

        assert!(matches!(
            Environment::get_at(&env, 3, "a"),
            Err(LoxError::Internal(_))
        ));
        assert!(matches!(
            Environment::get_at(&env, 0, "a"),
            Err(LoxError::Internal(_))
        ));
    }

    #[test]
    fn clear_hands_back_bindings_and_cuts_the_chain() {
        let outer: EnvRef = Environment::new().into_ref();
        let mut inner = Environment::with_enclosing(Rc::clone(&outer));
        inner.define("a", Value::from("kept"));

        let (values, enclosing) = inner.clear();

        assert_eq!(values, vec![Value::from("kept")]);
        assert!(enclosing.is_some_and(|env| Rc::ptr_eq(&env, &outer)));
        assert!(inner.get(&ident("a")).is_err());
        assert_eq!(Rc::strong_count(&outer), 1);
    }
}
