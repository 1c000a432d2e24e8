use std::sync::Arc;

use derivative::Derivative;
use serde_json::Value;

use crate::cursor::{Cursor, Env};
use crate::error::Outcome;
use crate::interpreter::Interpreter;
use crate::predicate::{OrderSelections, Predicate};
use crate::schema::Type;

/// A join function: given the parent cursor and the child query, produce
/// the continuation query to delegate. The continuation may be a `Group`
/// of parallel continuations.
pub type JoinFn = Arc<dyn Fn(&Arc<dyn Cursor>, &Query) -> Outcome<Query> + Send + Sync>;

/// An argument binding on a field selection, as produced by the elaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub name: String,
    pub value: Value,
}

impl Binding {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Binding { name: name.into(), value }
    }
}

/// An elaborated query tree.
///
/// Queries arrive validated, aliased and annotated by the upstream
/// elaborator; the interpreter only walks them.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub enum Query {
    /// A field selection.
    Select {
        name: String,
        args: Vec<Binding>,
        child: Box<Query>,
    },

    /// Rewrites the result key of the inner query.
    Rename { name: String, child: Box<Query> },

    /// Emits `{name: <child>}`.
    Wrap { name: String, child: Box<Query> },

    /// Sibling selections, concatenated in order.
    Group(Vec<Query>),

    /// Asserts at most one element, then evaluates.
    Unique(Box<Query>),

    /// Polymorphic narrowing to a concrete type.
    Narrow { tpe: String, child: Box<Query> },

    /// Delegates the child to the built-in introspection interpreter.
    Introspect(Box<Query>),

    /// Pushes environment bindings visible below this point.
    Environment { env: Env, child: Box<Query> },

    /// The cardinality of a child field, emitted under `name`.
    Count { name: String, child: Box<Query> },

    /// Filtering, ordering and paging wrapped around a list query.
    FilterOrderByOffsetLimit {
        pred: Option<Predicate>,
        order_by: Option<OrderSelections>,
        offset: Option<usize>,
        limit: Option<usize>,
        child: Box<Query>,
    },

    /// Delegates the child to another interpreter.
    Component {
        #[derivative(Debug = "ignore")]
        interpreter: Arc<dyn Interpreter>,
        #[derivative(Debug = "ignore")]
        join: JoinFn,
        child: Box<Query>,
    },

    /// Defers the child to this interpreter's next stage.
    Defer {
        #[derivative(Debug = "ignore")]
        join: JoinFn,
        child: Box<Query>,
        root_tpe: Type,
    },

    Empty,
}

impl Query {
    pub fn select(name: impl Into<String>, child: Query) -> Query {
        Query::Select {
            name: name.into(),
            args: Vec::new(),
            child: Box::new(child),
        }
    }

    pub fn select_with_args(name: impl Into<String>, args: Vec<Binding>, child: Query) -> Query {
        Query::Select {
            name: name.into(),
            args,
            child: Box::new(child),
        }
    }

    pub fn rename(name: impl Into<String>, child: Query) -> Query {
        Query::Rename { name: name.into(), child: Box::new(child) }
    }

    pub fn wrap(name: impl Into<String>, child: Query) -> Query {
        Query::Wrap { name: name.into(), child: Box::new(child) }
    }

    pub fn unique(child: Query) -> Query {
        Query::Unique(Box::new(child))
    }

    pub fn narrow(tpe: impl Into<String>, child: Query) -> Query {
        Query::Narrow { tpe: tpe.into(), child: Box::new(child) }
    }

    pub fn environment(env: Env, child: Query) -> Query {
        Query::Environment { env, child: Box::new(child) }
    }

    pub fn count(name: impl Into<String>, child: Query) -> Query {
        Query::Count { name: name.into(), child: Box::new(child) }
    }

    /// A `FilterOrderByOffsetLimit` with only a predicate.
    pub fn filter(pred: Predicate, child: Query) -> Query {
        Query::FilterOrderByOffsetLimit {
            pred: Some(pred),
            order_by: None,
            offset: None,
            limit: None,
            child: Box::new(child),
        }
    }

    /// The root field name this query would be keyed under, if it has one.
    pub fn root_name(&self) -> Option<&str> {
        match self {
            Query::Select { name, .. }
            | Query::Rename { name, .. }
            | Query::Wrap { name, .. }
            | Query::Count { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Rewrite the root result key of this query to `name`, when the root
    /// shape admits one.
    pub fn rename_root(&self, name: &str) -> Option<Query> {
        match self {
            Query::Rename { child, .. } => Some(Query::Rename {
                name: name.to_string(),
                child: child.clone(),
            }),
            sel @ Query::Select { name: n, .. } => {
                if n == name {
                    Some(sel.clone())
                } else {
                    Some(Query::rename(name, sel.clone()))
                }
            }
            wrap @ Query::Wrap { name: n, .. } if n == name => Some(wrap.clone()),
            count @ Query::Count { name: n, .. } if n == name => Some(count.clone()),
            _ => None,
        }
    }
}

/// A view of a possibly aliased field selection: either a bare `Select` or
/// `Rename(resultName, Select…)`.
#[derive(Debug, Clone, Copy)]
pub struct RenamedSelect<'a> {
    /// The field name being selected.
    pub name: &'a str,
    /// The selection's argument bindings.
    pub args: &'a [Binding],
    /// The selection's subquery.
    pub child: &'a Query,
    /// The response key the result lands under.
    pub result_name: &'a str,
}

/// The select node and its result key for a possibly aliased selection.
/// Unlike [`possibly_renamed_select`] this keeps the `Select` intact, for
/// callers that hand it on (join functions receive the whole selection).
pub fn renamed_select_parts(query: &Query) -> Option<(&Query, &str)> {
    match query {
        select @ Query::Select { name, .. } => Some((select, name)),
        Query::Rename { name, child } => match &**child {
            select @ Query::Select { .. } => Some((select, name)),
            _ => None,
        },
        _ => None,
    }
}

pub fn possibly_renamed_select(query: &Query) -> Option<RenamedSelect<'_>> {
    match query {
        Query::Select { name, args, child } => Some(RenamedSelect {
            name,
            args,
            child,
            result_name: name,
        }),
        Query::Rename { name: result_name, child } => match &**child {
            Query::Select { name, args, child } => Some(RenamedSelect {
                name,
                args,
                child,
                result_name,
            }),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renamed_select_views() {
        let bare = Query::select("city", Query::Empty);
        let view = possibly_renamed_select(&bare).unwrap();
        assert_eq!(view.name, "city");
        assert_eq!(view.result_name, "city");

        let aliased = Query::rename("capital", Query::select("city", Query::Empty));
        let view = possibly_renamed_select(&aliased).unwrap();
        assert_eq!(view.name, "city");
        assert_eq!(view.result_name, "capital");

        assert!(possibly_renamed_select(&Query::Empty).is_none());
        assert!(possibly_renamed_select(&Query::rename("x", Query::Empty)).is_none());
    }

    #[test]
    fn root_names() {
        assert_eq!(Query::select("city", Query::Empty).root_name(), Some("city"));
        assert_eq!(Query::wrap("data", Query::Empty).root_name(), Some("data"));
        assert_eq!(Query::Group(vec![]).root_name(), None);
    }

    #[test]
    fn rename_root_rewrites_or_keeps() {
        let sel = Query::select("city", Query::Empty);
        assert_eq!(sel.rename_root("city").unwrap().root_name(), Some("city"));
        let renamed = sel.rename_root("capital").unwrap();
        assert_eq!(renamed.root_name(), Some("capital"));
        assert!(matches!(renamed, Query::Rename { .. }));

        assert!(Query::Group(vec![]).rename_root("x").is_none());
    }
}
