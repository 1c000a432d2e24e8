use std::cmp::Ordering;
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

use crate::cursor::{self, Cursor};
use crate::error::{attempt, EvalError, Outcome};

/// A reified expression over a [`Cursor`], evaluable to a JSON scalar.
///
/// Terms are not closures: they are closed algebraic values with structural
/// accessors, so backends can lower them to query-language fragments (for
/// example a SQL `WHERE` clause) instead of evaluating them in memory.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    /// A constant value.
    Const(Value),

    /// The single scalar reached by walking `path` from the cursor.
    /// Evaluation fails unless exactly one leaf is reached.
    UniquePath(Vec<String>),

    /// The list of scalars reached by walking `path`, flattening lists.
    ListPath(Vec<String>),

    ToUpperCase(Box<Term>),
    ToLowerCase(Box<Term>),

    /// Bitwise operations over integer terms.
    AndB(Box<Term>, Box<Term>),
    OrB(Box<Term>, Box<Term>),
    XorB(Box<Term>, Box<Term>),
    NotB(Box<Term>),
}

impl Term {
    pub fn constant(value: impl Into<Value>) -> Term {
        Term::Const(value.into())
    }

    pub fn unique_path(parts: &[&str]) -> Term {
        Term::UniquePath(parts.iter().map(|s| s.to_string()).collect())
    }

    pub fn list_path(parts: &[&str]) -> Term {
        Term::ListPath(parts.iter().map(|s| s.to_string()).collect())
    }

    /// Evaluate against a cursor.
    pub fn apply(&self, cursor: &Arc<dyn Cursor>) -> Outcome<Value> {
        match self {
            Term::Const(v) => Outcome::ok(v.clone()),

            Term::UniquePath(path) => cursor::list_path(cursor, path).and_then(|cursors| {
                match cursors.as_slice() {
                    [unique] => cursor::leaf_value(unique),
                    _ => Outcome::fail(EvalError::NonUniquePath { path: path.join("/") }),
                }
            }),

            Term::ListPath(path) => cursor::flat_list_path(cursor, path).and_then(|cursors| {
                let mut problems = Vec::new();
                let mut values = Vec::with_capacity(cursors.len());
                for c in cursors {
                    values.push(attempt!(cursor::leaf_value(&c), problems));
                }
                Outcome::from_parts(Some(Value::Array(values)), problems)
            }),

            Term::ToUpperCase(inner) => inner
                .apply(cursor)
                .and_then(|v| string_op(v, |s| s.to_uppercase())),
            Term::ToLowerCase(inner) => inner
                .apply(cursor)
                .and_then(|v| string_op(v, |s| s.to_lowercase())),

            Term::AndB(x, y) => int_op2(x, y, cursor, |a, b| a & b),
            Term::OrB(x, y) => int_op2(x, y, cursor, |a, b| a | b),
            Term::XorB(x, y) => int_op2(x, y, cursor, |a, b| a ^ b),
            Term::NotB(x) => x.apply(cursor).and_then(|v| match v.as_i64() {
                Some(n) => Outcome::ok(Value::from(!n)),
                None => Outcome::problem(format!("Expected Int value, found {}", v)),
            }),
        }
    }

    /// The immediate subterms.
    pub fn children(&self) -> Vec<TermRef<'_>> {
        match self {
            Term::Const(_) | Term::UniquePath(_) | Term::ListPath(_) => Vec::new(),
            Term::ToUpperCase(x) | Term::ToLowerCase(x) | Term::NotB(x) => vec![TermRef::Term(x)],
            Term::AndB(x, y) | Term::OrB(x, y) | Term::XorB(x, y) => {
                vec![TermRef::Term(x), TermRef::Term(y)]
            }
        }
    }

    pub fn fold<A>(&self, init: A, f: &mut impl FnMut(A, TermRef<'_>) -> A) -> A {
        TermRef::Term(self).fold(init, f)
    }

    pub fn exists(&self, f: &mut impl FnMut(TermRef<'_>) -> bool) -> bool {
        TermRef::Term(self).exists(f)
    }

    pub fn forall(&self, f: &mut impl FnMut(TermRef<'_>) -> bool) -> bool {
        TermRef::Term(self).forall(f)
    }
}

fn string_op(value: Value, f: impl FnOnce(&str) -> String) -> Outcome<Value> {
    match value {
        Value::String(s) => Outcome::ok(Value::String(f(&s))),
        Value::Null => Outcome::ok(Value::Null),
        other => Outcome::problem(format!("Expected String value, found {}", other)),
    }
}

fn int_op2(
    x: &Term,
    y: &Term,
    cursor: &Arc<dyn Cursor>,
    f: impl FnOnce(i64, i64) -> i64,
) -> Outcome<Value> {
    x.apply(cursor).and_then(|xv| {
        y.apply(cursor).and_then(|yv| match (xv.as_i64(), yv.as_i64()) {
            (Some(a), Some(b)) => Outcome::ok(Value::from(f(a, b))),
            _ => Outcome::problem(format!("Expected Int values, found {} and {}", xv, yv)),
        })
    })
}

/// A reified boolean expression over a [`Cursor`].
#[derive(Debug, Clone)]
pub enum Predicate {
    True,
    False,
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),

    Eql(Term, Term),
    NEql(Term, Term),
    Lt(Term, Term),
    LtEql(Term, Term),
    Gt(Term, Term),
    GtEql(Term, Term),

    /// Membership of `elem` in the list produced by `list`.
    Contains { list: Term, elem: Term },

    /// Membership of the term's value in a fixed set of constants.
    In(Term, Vec<Value>),

    /// Tests emptiness of an optional term: holds when the term's
    /// nullness equals the expected flag.
    IsNull(Term, bool),

    Matches(Term, Regex),
    StartsWith(Term, String),
}

impl Predicate {
    /// Conjunction with construction-time simplification: `False` absorbs,
    /// `True` is dropped, the empty conjunction is `True`.
    pub fn and(preds: Vec<Predicate>) -> Predicate {
        let mut flat = Vec::new();
        for pred in preds {
            match pred {
                Predicate::True => {}
                Predicate::False => return Predicate::False,
                other => flat.push(other),
            }
        }
        let mut iter = flat.into_iter();
        match iter.next() {
            None => Predicate::True,
            Some(first) => iter.fold(first, |acc, p| {
                Predicate::And(Box::new(acc), Box::new(p))
            }),
        }
    }

    /// Disjunction with construction-time simplification: `True` absorbs,
    /// `False` is dropped, the empty disjunction is `False`.
    pub fn or(preds: Vec<Predicate>) -> Predicate {
        let mut flat = Vec::new();
        for pred in preds {
            match pred {
                Predicate::False => {}
                Predicate::True => return Predicate::True,
                other => flat.push(other),
            }
        }
        let mut iter = flat.into_iter();
        match iter.next() {
            None => Predicate::False,
            Some(first) => iter.fold(first, |acc, p| {
                Predicate::Or(Box::new(acc), Box::new(p))
            }),
        }
    }

    /// Recognize `path = c₁, path = c₂, …` over one shared left-hand term
    /// and rewrite to a single `In`. Returns `None` unless every input is
    /// an `Eql` of that term against a constant.
    pub fn in_from_eqls(eqls: &[Predicate]) -> Option<Predicate> {
        if eqls.is_empty() {
            return None;
        }
        let mut shared: Option<&Term> = None;
        let mut values = Vec::with_capacity(eqls.len());
        for pred in eqls {
            match pred {
                Predicate::Eql(x, Term::Const(v)) => {
                    match shared {
                        None => shared = Some(x),
                        Some(s) if s == x => {}
                        Some(_) => return None,
                    }
                    values.push(v.clone());
                }
                _ => return None,
            }
        }
        shared.map(|x| Predicate::In(x.clone(), values))
    }

    /// Evaluate against a cursor. `And`/`Or` short-circuit.
    pub fn apply(&self, cursor: &Arc<dyn Cursor>) -> Outcome<bool> {
        match self {
            Predicate::True => Outcome::ok(true),
            Predicate::False => Outcome::ok(false),

            Predicate::And(x, y) => x.apply(cursor).and_then(|b| {
                if b {
                    y.apply(cursor)
                } else {
                    Outcome::ok(false)
                }
            }),
            Predicate::Or(x, y) => x.apply(cursor).and_then(|b| {
                if b {
                    Outcome::ok(true)
                } else {
                    y.apply(cursor)
                }
            }),
            Predicate::Not(x) => x.apply(cursor).map(|b| !b),

            Predicate::Eql(x, y) => binary(x, y, cursor, |a, b| Outcome::ok(values_equal(&a, &b))),
            Predicate::NEql(x, y) => binary(x, y, cursor, |a, b| Outcome::ok(!values_equal(&a, &b))),
            Predicate::Lt(x, y) => ordered(x, y, cursor, Ordering::is_lt),
            Predicate::LtEql(x, y) => ordered(x, y, cursor, Ordering::is_le),
            Predicate::Gt(x, y) => ordered(x, y, cursor, Ordering::is_gt),
            Predicate::GtEql(x, y) => ordered(x, y, cursor, Ordering::is_ge),

            Predicate::Contains { list, elem } => binary(list, elem, cursor, |l, e| match l {
                Value::Array(items) => Outcome::ok(items.iter().any(|i| values_equal(i, &e))),
                other => Outcome::problem(format!("Expected List value, found {}", other)),
            }),

            Predicate::In(x, values) => x
                .apply(cursor)
                .map(|v| values.iter().any(|candidate| values_equal(candidate, &v))),

            Predicate::IsNull(x, expected) => x.apply(cursor).map(|v| v.is_null() == *expected),

            Predicate::Matches(x, regex) => x.apply(cursor).and_then(|v| match v {
                Value::String(s) => Outcome::ok(regex.is_match(&s)),
                Value::Null => Outcome::ok(false),
                other => Outcome::problem(format!("Expected String value, found {}", other)),
            }),

            Predicate::StartsWith(x, prefix) => x.apply(cursor).and_then(|v| match v {
                Value::String(s) => Outcome::ok(s.starts_with(prefix.as_str())),
                Value::Null => Outcome::ok(false),
                other => Outcome::problem(format!("Expected String value, found {}", other)),
            }),
        }
    }

    /// The immediate subterms and subpredicates.
    pub fn children(&self) -> Vec<TermRef<'_>> {
        match self {
            Predicate::True | Predicate::False => Vec::new(),
            Predicate::And(x, y) | Predicate::Or(x, y) => {
                vec![TermRef::Predicate(x), TermRef::Predicate(y)]
            }
            Predicate::Not(x) => vec![TermRef::Predicate(x)],
            Predicate::Eql(x, y)
            | Predicate::NEql(x, y)
            | Predicate::Lt(x, y)
            | Predicate::LtEql(x, y)
            | Predicate::Gt(x, y)
            | Predicate::GtEql(x, y) => vec![TermRef::Term(x), TermRef::Term(y)],
            Predicate::Contains { list, elem } => vec![TermRef::Term(list), TermRef::Term(elem)],
            Predicate::In(x, _)
            | Predicate::IsNull(x, _)
            | Predicate::Matches(x, _)
            | Predicate::StartsWith(x, _) => vec![TermRef::Term(x)],
        }
    }

    pub fn fold<A>(&self, init: A, f: &mut impl FnMut(A, TermRef<'_>) -> A) -> A {
        TermRef::Predicate(self).fold(init, f)
    }

    pub fn exists(&self, f: &mut impl FnMut(TermRef<'_>) -> bool) -> bool {
        TermRef::Predicate(self).exists(f)
    }

    pub fn forall(&self, f: &mut impl FnMut(TermRef<'_>) -> bool) -> bool {
        TermRef::Predicate(self).forall(f)
    }
}

fn binary(
    x: &Term,
    y: &Term,
    cursor: &Arc<dyn Cursor>,
    f: impl FnOnce(Value, Value) -> Outcome<bool>,
) -> Outcome<bool> {
    x.apply(cursor)
        .and_then(|xv| y.apply(cursor).and_then(|yv| f(xv, yv)))
}

fn ordered(
    x: &Term,
    y: &Term,
    cursor: &Arc<dyn Cursor>,
    f: impl FnOnce(Ordering) -> bool,
) -> Outcome<bool> {
    binary(x, y, cursor, |a, b| match compare_values(&a, &b) {
        Some(ordering) => Outcome::ok(f(ordering)),
        None => Outcome::problem(format!("Cannot compare {} with {}", a, b)),
    })
}

/// Equality over the JSON scalar domain, numerically aware (`1` equals
/// `1.0`).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Ordering over the JSON scalar domain. Values of different kinds are
/// incomparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => a.as_f64().partial_cmp(&b.as_f64()),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// A node in a term/predicate tree, for generic traversals.
#[derive(Debug, Clone, Copy)]
pub enum TermRef<'a> {
    Term(&'a Term),
    Predicate(&'a Predicate),
}

impl<'a> TermRef<'a> {
    pub fn children(&self) -> Vec<TermRef<'a>> {
        match self {
            TermRef::Term(t) => t.children(),
            TermRef::Predicate(p) => p.children(),
        }
    }

    /// Pre-order fold over this node and everything below it.
    pub fn fold<A>(&self, init: A, f: &mut impl FnMut(A, TermRef<'a>) -> A) -> A {
        let acc = f(init, *self);
        self.children()
            .into_iter()
            .fold(acc, |acc, child| child.fold(acc, f))
    }

    pub fn exists(&self, f: &mut impl FnMut(TermRef<'a>) -> bool) -> bool {
        f(*self) || self.children().iter().any(|child| child.exists(f))
    }

    pub fn forall(&self, f: &mut impl FnMut(TermRef<'a>) -> bool) -> bool {
        f(*self) && self.children().iter().all(|child| child.forall(f))
    }
}

/// One sort key of an `order by` clause.
#[derive(Debug, Clone)]
pub struct OrderSelection {
    pub term: Term,
    pub ascending: bool,
    pub nulls_last: bool,
}

impl OrderSelection {
    pub fn ascending(term: Term) -> Self {
        OrderSelection { term, ascending: true, nulls_last: true }
    }

    pub fn descending(term: Term) -> Self {
        OrderSelection { term, ascending: false, nulls_last: true }
    }

    fn compare(&self, a: &Value, b: &Value) -> Ordering {
        let ordering = match (a.is_null(), b.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => {
                if self.nulls_last {
                    return Ordering::Greater;
                } else {
                    return Ordering::Less;
                }
            }
            (false, true) => {
                if self.nulls_last {
                    return Ordering::Less;
                } else {
                    return Ordering::Greater;
                }
            }
            (false, false) => compare_values(a, b).unwrap_or(Ordering::Equal),
        };
        if self.ascending {
            ordering
        } else {
            ordering.reverse()
        }
    }
}

/// A compound sort: keys are applied in order, the first non-equal key
/// decides.
#[derive(Debug, Clone)]
pub struct OrderSelections(pub Vec<OrderSelection>);

impl OrderSelections {
    /// Materialize and stably sort the cursors by the sort keys.
    pub fn order(&self, cursors: Vec<Arc<dyn Cursor>>) -> Outcome<Vec<Arc<dyn Cursor>>> {
        let mut problems = Vec::new();
        let mut keyed: Vec<(Vec<Value>, Arc<dyn Cursor>)> = Vec::with_capacity(cursors.len());
        for cursor in cursors {
            let mut keys = Vec::with_capacity(self.0.len());
            for sel in &self.0 {
                keys.push(attempt!(sel.term.apply(&cursor), problems));
            }
            keyed.push((keys, cursor));
        }

        keyed.sort_by(|(a, _), (b, _)| {
            for (sel, (ka, kb)) in self.0.iter().zip(a.iter().zip(b.iter())) {
                let ordering = sel.compare(ka, kb);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });

        Outcome::from_parts(Some(keyed.into_iter().map(|(_, c)| c).collect()), problems)
    }
}
