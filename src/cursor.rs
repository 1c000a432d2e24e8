use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{attempt, Outcome};
use crate::schema::Type;

/// Append-only bindings carried alongside a cursor, visible to join
/// functions and to anything evaluating in the cursor's scope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Env {
    bindings: HashMap<String, Value>,
}

impl Env {
    pub fn new() -> Env {
        Env::default()
    }

    pub fn add(&self, name: impl Into<String>, value: Value) -> Env {
        let mut bindings = self.bindings.clone();
        bindings.insert(name.into(), value);
        Env { bindings }
    }

    /// Merge two environments; bindings in `other` win.
    pub fn merge(&self, other: &Env) -> Env {
        let mut bindings = self.bindings.clone();
        bindings.extend(other.bindings.iter().map(|(k, v)| (k.clone(), v.clone())));
        Env { bindings }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// An immutable navigator over a backing data source, typed at its current
/// position.
///
/// The capability set is deliberately small; the evaluator and the
/// term algebra are written entirely against it, so a backend only has to
/// teach a cursor how to step through its own data representation.
pub trait Cursor: Debug + Send + Sync {
    /// The GraphQL type of the data at the current position.
    fn tpe(&self) -> &Type;

    fn env(&self) -> &Env;

    /// The same position with `env` bindings appended.
    fn with_env(&self, env: &Env) -> Arc<dyn Cursor>;

    fn is_leaf(&self) -> bool;

    /// The scalar or enum value at the current position.
    fn as_leaf(&self) -> Outcome<Value>;

    fn is_nullable(&self) -> bool;

    /// Step inside a nullable position; `None` when the data is absent.
    fn as_nullable(&self) -> Outcome<Option<Arc<dyn Cursor>>>;

    fn is_list(&self) -> bool;

    /// The element cursors of a list position, in data order.
    fn as_list(&self) -> Outcome<Vec<Arc<dyn Cursor>>>;

    /// Step to a field of an object position. `result_name` is the aliased
    /// response key, for backends that key their data by result position.
    fn field(&self, name: &str, result_name: Option<&str>) -> Outcome<Arc<dyn Cursor>>;

    /// Can this position be narrowed to the named subtype?
    fn narrows_to(&self, tpe_name: &str) -> bool;

    fn narrow(&self, tpe_name: &str) -> Outcome<Arc<dyn Cursor>>;

    /// The cursor to take the candidate list from when evaluating a
    /// uniqueness assertion. Most backends return themselves.
    fn preunique(&self) -> Outcome<Arc<dyn Cursor>>;
}

/// All cursors reached by walking `path` through fields, flattening list
/// positions and dropping absent nullable positions along the way.
pub fn list_path(cursor: &Arc<dyn Cursor>, path: &[String]) -> Outcome<Vec<Arc<dyn Cursor>>> {
    if path.is_empty() {
        return Outcome::ok(vec![cursor.clone()]);
    }
    if cursor.is_nullable() {
        cursor.as_nullable().and_then(|opt| match opt {
            None => Outcome::ok(Vec::new()),
            Some(inner) => list_path(&inner, path),
        })
    } else if cursor.is_list() {
        cursor.as_list().and_then(|elems| {
            let mut problems = Vec::new();
            let mut out = Vec::new();
            for elem in elems {
                out.extend(attempt!(list_path(&elem, path), problems));
            }
            Outcome::from_parts(Some(out), problems)
        })
    } else {
        cursor
            .field(&path[0], None)
            .and_then(|child| list_path(&child, &path[1..]))
    }
}

/// Like [`list_path`], but additionally flattens any list cursors reached
/// at the end of the path down to their elements.
pub fn flat_list_path(cursor: &Arc<dyn Cursor>, path: &[String]) -> Outcome<Vec<Arc<dyn Cursor>>> {
    list_path(cursor, path).and_then(|cursors| {
        let mut problems = Vec::new();
        let mut out = Vec::new();
        for cursor in cursors {
            out.extend(attempt!(flatten(&cursor), problems));
        }
        Outcome::from_parts(Some(out), problems)
    })
}

fn flatten(cursor: &Arc<dyn Cursor>) -> Outcome<Vec<Arc<dyn Cursor>>> {
    if cursor.is_nullable() {
        cursor.as_nullable().and_then(|opt| match opt {
            None => Outcome::ok(Vec::new()),
            Some(inner) => flatten(&inner),
        })
    } else if cursor.is_list() {
        cursor.as_list().and_then(|elems| {
            let mut problems = Vec::new();
            let mut out = Vec::new();
            for elem in elems {
                out.extend(attempt!(flatten(&elem), problems));
            }
            Outcome::from_parts(Some(out), problems)
        })
    } else {
        Outcome::ok(vec![cursor.clone()])
    }
}

/// The scalar value at a position, looking through nullability. An absent
/// nullable reads as JSON null.
pub fn leaf_value(cursor: &Arc<dyn Cursor>) -> Outcome<Value> {
    if cursor.is_nullable() {
        cursor.as_nullable().and_then(|opt| match opt {
            None => Outcome::ok(Value::Null),
            Some(inner) => leaf_value(&inner),
        })
    } else {
        cursor.as_leaf()
    }
}
