use sqlmapper_helpers::IndexMap;

use crate::errors::Result;
use crate::expr::ValueSource;
use crate::reflection::{Navigator, ShapeRegistry, tokenize};
use crate::value::Value;

/// The name the whole parameter object is reachable under from dynamic SQL
/// expressions.
pub const PARAMETER_BINDING: &str = "_parameter";

/// The lexically nested name→value mapping dynamic SQL evaluates against.
/// Lookup order: local frames (innermost first), then the host parameter
/// object through the navigator.
pub struct Scope<'a> {
    registry: &'a ShapeRegistry,
    parameter: &'a Value,
    frames: Vec<Value>,
    exported: IndexMap<String, Value>,
}

impl<'a> Scope<'a> {
    pub fn new(registry: &'a ShapeRegistry, parameter: &'a Value) -> Self {
        Scope {
            registry,
            parameter,
            frames: vec![Value::Map(IndexMap::default())],
            exported: IndexMap::default(),
        }
    }

    pub fn registry(&self) -> &'a ShapeRegistry {
        self.registry
    }

    pub fn parameter(&self) -> &'a Value {
        self.parameter
    }

    /// Bind a name in the innermost frame. Every binding is also recorded
    /// in the exported set the parameter binder reads after evaluation
    /// (latest binding of a name wins there).
    pub fn bind(&mut self, name: &str, value: Value) {
        self.exported.insert(name.to_string(), value.clone());
        if let Some(Value::Map(frame)) = self.frames.last_mut() {
            frame.insert(name.to_string(), value);
        }
    }

    pub fn push_frame(&mut self) {
        self.frames.push(Value::Map(IndexMap::default()));
    }

    pub fn pop_frame(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    /// Bindings that outlive evaluation, consumed by the parameter binder
    /// for descriptor property paths that name scope locals.
    pub fn into_exported(self) -> IndexMap<String, Value> {
        self.exported
    }

    fn first_segment_name<'p>(&self, path: &'p str) -> Result<&'p str> {
        match tokenize(path).next() {
            Some(segment) => Ok(segment?.name),
            None => Ok(path),
        }
    }
}

impl ValueSource for Scope<'_> {
    fn lookup(&self, path: &str) -> Result<Value> {
        let navigator = Navigator::new(self.registry);
        let head = self.first_segment_name(path)?;

        if head == PARAMETER_BINDING {
            return match path.strip_prefix(PARAMETER_BINDING).and_then(|r| r.strip_prefix('.')) {
                Some(rest) => navigator.get(self.parameter, rest),
                None => Ok(self.parameter.clone()),
            };
        }

        for frame in self.frames.iter().rev() {
            if let Value::Map(map) = frame {
                if map.contains_key(head) {
                    return navigator.get(frame, path);
                }
            }
        }

        // A scalar parameter answers any simple name, the way `#{value}`
        // binds a bare scalar argument.
        let scalar = !matches!(
            self.parameter,
            Value::Map(_) | Value::Object(_) | Value::Array(_)
        );
        if scalar && !path.contains('.') && !path.contains('[') {
            return Ok(self.parameter.clone());
        }

        navigator.get(self.parameter, path)
    }
}

/// The mutable accumulator a SQL node tree evaluates into: the scope plus
/// the growing SQL text and the counter `<foreach>` uses to uniquify its
/// placeholder bindings.
pub struct DynamicContext<'a> {
    pub scope: Scope<'a>,
    sql: String,
    unique: u32,
}

impl<'a> DynamicContext<'a> {
    pub fn new(registry: &'a ShapeRegistry, parameter: &'a Value) -> Self {
        DynamicContext {
            scope: Scope::new(registry, parameter),
            sql: String::new(),
            unique: 0,
        }
    }

    /// Append a fragment, separating it from the existing text with a
    /// single space. Empty fragments are ignored.
    pub fn append(&mut self, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        if !self.sql.is_empty() {
            self.sql.push(' ');
        }
        self.sql.push_str(fragment);
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn into_parts(self) -> (String, IndexMap<String, Value>) {
        (self.sql, self.scope.into_exported())
    }

    pub fn next_unique(&mut self) -> u32 {
        let current = self.unique;
        self.unique += 1;
        current
    }

    /// Evaluate `f` into a detached buffer and return what it produced,
    /// leaving the main buffer untouched. Used by the trim family.
    pub fn capture<F>(&mut self, f: F) -> Result<String>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        let saved = std::mem::take(&mut self.sql);
        let outcome = f(self);
        let captured = std::mem::replace(&mut self.sql, saved);
        outcome.map(|()| captured)
    }
}
