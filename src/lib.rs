#![cfg_attr(feature = "failfast", allow(unreachable_code))]

//! Core query interpreter for Quilt, a composite multi-backend GraphQL
//! execution engine.
//!
//! A single user query may touch several back-end data sources, each
//! represented by its own interpreter. The core walks an elaborated query
//! against a typed [`Cursor`], producing a partially materialized JSON
//! tree ([`ProtoJson`]) whose unresolved subtrees are delegated to sibling
//! interpreters, then iteratively completes those subtrees until the tree
//! is fully concrete.

macro_rules! failfast_debug {
    ($($tokens:tt)+) => {{
        tracing::debug!($($tokens)+);
        #[cfg(feature = "failfast")]
        panic!(
            "failfast triggered. \
            Please remove the feature failfast if you don't want to see these panics"
        );
    }};
}

macro_rules! failfast_error {
    ($($tokens:tt)+) => {{
        tracing::error!($($tokens)+);
        #[cfg(feature = "failfast")]
        panic!(
            "failfast triggered. \
            Please remove the feature failfast if you don't want to see these panics"
        );
    }};
}

mod cursor;
mod error;
mod interpreter;
pub mod introspection;
mod mapping;
mod predicate;
mod proto_json;
mod query;
mod response;
mod schema;

pub use cursor::*;
pub use error::{EvalError, Location, Outcome, Problem};
pub use interpreter::*;
pub use mapping::*;
pub use predicate::*;
pub use proto_json::*;
pub use query::*;
pub use response::*;
pub use schema::*;

pub mod prelude {
    pub use crate::cursor::{Cursor, Env};
    pub use crate::error::{Outcome, Problem};
    pub use crate::interpreter::{complete, complete_all, Interpreter, QueryInterpreter, RootQuery};
    pub use crate::mapping::{Context, Mapping, ValueCursor, ValueMapping};
    pub use crate::predicate::{OrderSelection, OrderSelections, Predicate, Term};
    pub use crate::proto_json::ProtoJson;
    pub use crate::query::Query;
    pub use crate::response::{mk_response, Response};
    pub use crate::schema::{Schema, Type};
}
