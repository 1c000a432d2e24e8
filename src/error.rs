use displaydoc::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A line/column pair locating a problem in the source query.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

/// A structured GraphQL problem.
///
/// Problems are accumulated rather than thrown: a single field's failure
/// surfaces here while sibling fields keep evaluating.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub message: String,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub locations: Vec<Location>,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub path: Vec<String>,
}

impl Problem {
    pub fn new(message: impl Into<String>) -> Self {
        Problem {
            message: message.into(),
            locations: Vec::new(),
            path: Vec::new(),
        }
    }

    pub fn at_path(mut self, path: Vec<String>) -> Self {
        self.path = path;
        self
    }
}

/// Error kinds raised by the interpreter core.
///
/// Note that these are not returned to the client as-is, but are instead
/// converted to [`Problem`]s and reported in the response's `errors` array.
#[derive(Error, Display, Debug, Clone, Eq, PartialEq)]
pub enum EvalError {
    /// Mismatched query and cursor type in {phase}
    MismatchedQueryAndCursor {
        /// The evaluation phase that observed the mismatch.
        phase: String,
    },

    /// Stuck at type {tpe} for {query}
    Stuck { tpe: String, query: String },

    /// Bad root query '{query}'
    BadRootQuery { query: String },

    /// Join continuation has unexpected shape
    BadJoinContinuation,

    /// Type {tpe} has no field '{field}'
    NoField { tpe: String, field: String },

    /// Root type {tpe} has no field '{field}'
    NoRootField { tpe: String, field: String },

    /// No match
    NoMatch,

    /// Multiple matches
    MultipleMatches,

    /// '__typename' cannot be applied to non-selectable type {tpe}
    NonSelectableTypename { tpe: String },

    /// Expected exactly one element for path {path}
    NonUniquePath { path: String },
}

impl EvalError {
    pub fn to_problem(&self) -> Problem {
        Problem::new(self.to_string())
    }
}

impl From<EvalError> for Problem {
    fn from(err: EvalError) -> Self {
        err.to_problem()
    }
}

/// An accumulating result: a value, a value with accumulated problems, or
/// problems only.
///
/// `Err` is non-empty by construction; an operation that degrades but still
/// produces a best-effort value returns `Mixed`.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome<T> {
    Ok(T),
    Mixed(T, Vec<Problem>),
    Err(Vec<Problem>),
}

impl<T> Outcome<T> {
    pub fn ok(value: T) -> Self {
        Outcome::Ok(value)
    }

    pub fn err(problems: Vec<Problem>) -> Self {
        debug_assert!(!problems.is_empty(), "Outcome::Err must carry at least one problem");
        Outcome::Err(problems)
    }

    /// A failure carrying a single problem built from `message`.
    pub fn problem(message: impl Into<String>) -> Self {
        Outcome::Err(vec![Problem::new(message)])
    }

    pub fn fail(err: EvalError) -> Self {
        Outcome::Err(vec![err.to_problem()])
    }

    /// Reassemble from an optional value and accumulated problems.
    pub fn from_parts(value: Option<T>, problems: Vec<Problem>) -> Self {
        match (value, problems) {
            (Some(v), problems) if problems.is_empty() => Outcome::Ok(v),
            (Some(v), problems) => Outcome::Mixed(v, problems),
            (None, problems) => Outcome::err(problems),
        }
    }

    /// Decompose into the optional value and the accumulated problems.
    pub fn split(self) -> (Option<T>, Vec<Problem>) {
        match self {
            Outcome::Ok(v) => (Some(v), Vec::new()),
            Outcome::Mixed(v, problems) => (Some(v), problems),
            Outcome::Err(problems) => (None, problems),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok(_))
    }

    pub fn is_err(&self) -> bool {
        matches!(self, Outcome::Err(_))
    }

    pub fn value(self) -> Option<T> {
        self.split().0
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Ok(v) => Outcome::Ok(f(v)),
            Outcome::Mixed(v, problems) => Outcome::Mixed(f(v), problems),
            Outcome::Err(problems) => Outcome::Err(problems),
        }
    }

    pub fn and_then<U>(self, f: impl FnOnce(T) -> Outcome<U>) -> Outcome<U> {
        match self {
            Outcome::Ok(v) => f(v),
            Outcome::Mixed(v, problems) => f(v).with_problems(problems),
            Outcome::Err(problems) => Outcome::Err(problems),
        }
    }

    /// Accumulate `more` problems without changing the value.
    pub fn with_problems(self, mut more: Vec<Problem>) -> Self {
        if more.is_empty() {
            return self;
        }
        match self {
            Outcome::Ok(v) => Outcome::Mixed(v, more),
            Outcome::Mixed(v, mut problems) => {
                more.append(&mut problems);
                Outcome::Mixed(v, more)
            }
            Outcome::Err(mut problems) => {
                more.append(&mut problems);
                Outcome::Err(more)
            }
        }
    }
}

/// Unwrap an [`Outcome`], accumulating partial-result problems into the
/// given `Vec<Problem>` and early-returning on failure with everything
/// accumulated so far.
macro_rules! attempt {
    ($expr:expr, $problems:ident) => {
        match $expr {
            $crate::error::Outcome::Ok(value) => value,
            $crate::error::Outcome::Mixed(value, mut ps) => {
                $problems.append(&mut ps);
                value
            }
            $crate::error::Outcome::Err(mut ps) => {
                $problems.append(&mut ps);
                return $crate::error::Outcome::Err($problems);
            }
        }
    };
}

pub(crate) use attempt;
