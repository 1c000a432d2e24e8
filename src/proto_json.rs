use std::sync::Arc;

use derivative::Derivative;
use serde_json::{Map, Value};

use crate::cursor::Env;
use crate::interpreter::Interpreter;
use crate::query::Query;
use crate::schema::Type;

/// A deferred subtree: a root query to be evaluated by `interpreter` in a
/// later completion stage, in the environment captured at staging time.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct StagedNode {
    #[derivative(Debug = "ignore")]
    pub interpreter: Arc<dyn Interpreter>,
    pub query: Query,
    pub root_tpe: Type,
    pub env: Env,
}

/// A partially materialized JSON tree.
///
/// Constructors maintain the collapse invariant: a compound node all of
/// whose parts are `Concrete` is itself built as `Concrete`, so a tree
/// containing no `Staged` node anywhere is structurally `Concrete`.
///
/// `Staged` nodes compare by reference identity. Two separately
/// constructed placeholders with identical payloads are distinct; the
/// completion engine relies on this to match placeholders after batched
/// re-evaluation.
#[derive(Debug, Clone)]
pub enum ProtoJson {
    /// Fully materialized JSON.
    Concrete(Value),

    /// An opaque deferred subtree owned by an interpreter.
    Staged(Arc<StagedNode>),

    /// An object whose fields may still be deferred.
    Object(Vec<(String, ProtoJson)>),

    /// An array whose elements may still be deferred.
    Array(Vec<ProtoJson>),

    /// Projects the named field from the inner value once it materializes.
    Select(Box<ProtoJson>, String),
}

impl PartialEq for ProtoJson {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ProtoJson::Concrete(a), ProtoJson::Concrete(b)) => a == b,
            (ProtoJson::Staged(a), ProtoJson::Staged(b)) => Arc::ptr_eq(a, b),
            (ProtoJson::Object(a), ProtoJson::Object(b)) => a == b,
            (ProtoJson::Array(a), ProtoJson::Array(b)) => a == b,
            (ProtoJson::Select(a, f), ProtoJson::Select(b, g)) => f == g && a == b,
            _ => false,
        }
    }
}

impl ProtoJson {
    pub fn from_json(value: Value) -> ProtoJson {
        ProtoJson::Concrete(value)
    }

    pub fn null() -> ProtoJson {
        ProtoJson::Concrete(Value::Null)
    }

    /// An object from named fields, collapsing to concrete JSON when every
    /// field already is.
    pub fn from_fields(fields: Vec<(String, ProtoJson)>) -> ProtoJson {
        if fields.iter().all(|(_, pj)| matches!(pj, ProtoJson::Concrete(_))) {
            let mut object = Map::with_capacity(fields.len());
            for (name, pj) in fields {
                match pj {
                    ProtoJson::Concrete(value) => {
                        object.insert(name, value);
                    }
                    _ => unreachable!("all fields checked concrete; qed"),
                }
            }
            ProtoJson::Concrete(Value::Object(object))
        } else {
            ProtoJson::Object(fields)
        }
    }

    /// An array from elements, collapsing to concrete JSON when every
    /// element already is.
    pub fn from_values(elems: Vec<ProtoJson>) -> ProtoJson {
        if elems.iter().all(|pj| matches!(pj, ProtoJson::Concrete(_))) {
            let values = elems
                .into_iter()
                .map(|pj| match pj {
                    ProtoJson::Concrete(value) => value,
                    _ => unreachable!("all elements checked concrete; qed"),
                })
                .collect();
            ProtoJson::Concrete(Value::Array(values))
        } else {
            ProtoJson::Array(elems)
        }
    }

    /// A deferred subtree placeholder.
    pub fn staged(
        interpreter: Arc<dyn Interpreter>,
        query: Query,
        root_tpe: Type,
        env: Env,
    ) -> ProtoJson {
        ProtoJson::Staged(Arc::new(StagedNode { interpreter, query, root_tpe, env }))
    }

    /// Project `field` from `inner` once it materializes; projects
    /// immediately when `inner` is already concrete.
    pub fn select(inner: ProtoJson, field: &str) -> ProtoJson {
        match inner {
            ProtoJson::Concrete(Value::Object(mut object)) => {
                ProtoJson::Concrete(object.remove(field).unwrap_or(Value::Null))
            }
            ProtoJson::Concrete(_) => ProtoJson::null(),
            deferred => ProtoJson::Select(Box::new(deferred), field.to_string()),
        }
    }

    /// `true` iff this node itself is a deferred placeholder. Not
    /// recursive.
    pub fn is_deferred(&self) -> bool {
        matches!(self, ProtoJson::Staged(_))
    }

    /// Recursive scan for any deferred placeholder.
    pub fn contains_deferred(&self) -> bool {
        match self {
            ProtoJson::Concrete(_) => false,
            ProtoJson::Staged(_) => true,
            ProtoJson::Object(fields) => fields.iter().any(|(_, pj)| pj.contains_deferred()),
            ProtoJson::Array(elems) => elems.iter().any(|pj| pj.contains_deferred()),
            ProtoJson::Select(inner, _) => inner.contains_deferred(),
        }
    }

    /// Flatten a list of object-shaped values into a single object,
    /// preserving insertion order. Non-object entries are skipped; an
    /// empty result is JSON null. For a duplicate key the first occurrence
    /// keeps its position and the later value wins.
    pub fn merge_objects(values: Vec<ProtoJson>) -> ProtoJson {
        let mut fields: Vec<(String, ProtoJson)> = Vec::new();
        for value in values {
            let entries: Vec<(String, ProtoJson)> = match value {
                ProtoJson::Object(entries) => entries,
                ProtoJson::Concrete(Value::Object(object)) => object
                    .into_iter()
                    .map(|(name, v)| (name, ProtoJson::Concrete(v)))
                    .collect(),
                _ => continue,
            };
            for (name, pj) in entries {
                match fields.iter().position(|(existing, _)| *existing == name) {
                    Some(position) => fields[position].1 = pj,
                    None => fields.push((name, pj)),
                }
            }
        }

        if fields.is_empty() {
            ProtoJson::null()
        } else {
            ProtoJson::from_fields(fields)
        }
    }
}
