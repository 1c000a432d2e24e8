use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use derivative::Derivative;
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use serde_json::{Map, Value};
use tracing::trace;

use crate::cursor::Cursor;
use crate::cursor::Env;
use crate::error::{attempt, EvalError, Outcome, Problem};
use crate::introspection;
use crate::mapping::{Context, Mapping};
use crate::proto_json::{ProtoJson, StagedNode};
use crate::query::{possibly_renamed_select, renamed_select_parts, Query};
use crate::response::{mk_response, Response};
use crate::schema::{join_type, Dealiased, NamedType, Schema, Type};

/// One root evaluation unit: a query, the root type it is addressed to,
/// and the environment it runs in.
#[derive(Debug, Clone)]
pub struct RootQuery {
    pub query: Query,
    pub tpe: Type,
    pub env: Env,
}

/// The contract a backend's evaluator exposes to the completion engine.
#[async_trait]
pub trait Interpreter: Send + Sync {
    /// Evaluate a single root query to a possibly partial value.
    async fn run_root_value(
        &self,
        query: &Query,
        root_tpe: &Type,
        env: &Env,
    ) -> Outcome<ProtoJson>;

    /// Batched evaluation, the entry point used by the completion engine.
    /// Results align positionally with the input; a failed root
    /// contributes JSON null alongside its problems.
    ///
    /// The default evaluates each root independently. Backends that can
    /// coalesce a batch into fewer trips to their store override this.
    async fn run_root_values(&self, queries: &[RootQuery]) -> (Vec<Problem>, Vec<ProtoJson>) {
        let mut problems = Vec::new();
        let mut values = Vec::with_capacity(queries.len());
        for root in queries {
            match self.run_root_value(&root.query, &root.tpe, &root.env).await {
                Outcome::Ok(pj) => values.push(pj),
                Outcome::Mixed(pj, mut ps) => {
                    problems.append(&mut ps);
                    values.push(pj);
                }
                Outcome::Err(mut ps) => {
                    problems.append(&mut ps);
                    values.push(ProtoJson::null());
                }
            }
        }
        (problems, values)
    }
}

/// The generic single-stage evaluator, bound to a [`Mapping`].
///
/// Walks an elaborated query against the mapping's cursors, producing a
/// [`ProtoJson`] whose unresolved subtrees are staged for later stages.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct QueryInterpreter {
    #[derivative(Debug = "ignore")]
    mapping: Arc<dyn Mapping>,
    schema: Arc<Schema>,
    #[derivative(Debug = "ignore")]
    this: Weak<QueryInterpreter>,
}

impl QueryInterpreter {
    pub fn new(mapping: Arc<dyn Mapping>) -> Arc<QueryInterpreter> {
        let schema = mapping.schema();
        Arc::new_cyclic(|this| QueryInterpreter {
            mapping,
            schema,
            this: this.clone(),
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    fn self_handle(&self) -> Arc<dyn Interpreter> {
        self.this
            .upgrade()
            .expect("the interpreter is always constructed behind an Arc; qed")
    }

    /// Evaluate a top-level query to a complete response.
    ///
    /// Splits the query into introspection and regular roots, evaluates
    /// each, merges the root objects in original order, and drives the
    /// merged tree through completion.
    #[tracing::instrument(skip_all)]
    pub async fn run(&self, query: &Query, root_tpe: &Type, env: Env) -> Response {
        let roots: Vec<Query> = match query {
            Query::Group(queries) => queries.clone(),
            other => vec![other.clone()],
        };

        let mut problems = Vec::new();
        let mut slots: Vec<Option<ProtoJson>> = (0..roots.len()).map(|_| None).collect();
        let mut regular: Vec<(usize, Query)> = Vec::new();

        for (position, root) in roots.into_iter().enumerate() {
            match root {
                Query::Introspect(child) => {
                    let interpreter = introspection::interpreter(&self.schema);
                    let outcome = interpreter
                        .run_root_value(&child, &introspection::root_type(), &env)
                        .await;
                    let (value, mut ps) = outcome.split();
                    problems.append(&mut ps);
                    slots[position] = Some(value.unwrap_or_else(ProtoJson::null));
                }
                other => regular.push((position, other)),
            }
        }

        if !regular.is_empty() {
            let queries: Vec<RootQuery> = regular
                .iter()
                .map(|(_, query)| RootQuery {
                    query: query.clone(),
                    tpe: root_tpe.clone(),
                    env: env.clone(),
                })
                .collect();
            let (mut ps, values) = self.run_root_values(&queries).await;
            problems.append(&mut ps);
            for ((position, _), value) in regular.into_iter().zip(values) {
                slots[position] = Some(value);
            }
        }

        let merged = ProtoJson::merge_objects(slots.into_iter().flatten().collect());
        let (mut ps, data) = complete(merged).await;
        problems.append(&mut ps);
        mk_response(Some(data), problems)
    }

    fn run_root_value0<'a>(
        &'a self,
        query: &'a Query,
        context: Context,
        env: Env,
    ) -> BoxFuture<'a, Outcome<ProtoJson>> {
        async move {
            match query {
                Query::Environment { env: bindings, child } => {
                    self.run_root_value0(child, context, env.merge(bindings)).await
                }

                Query::Wrap { child, .. } if matches!(&**child, Query::Component { .. }) => {
                    match &**child {
                        Query::Component { interpreter, child: delegated, .. } => {
                            interpreter.run_root_value(delegated, &context.tpe, &env).await
                        }
                        _ => unreachable!("guard matched Component; qed"),
                    }
                }

                _ => match possibly_renamed_select(query) {
                    Some(view) => {
                        let field_tpe = match context.tpe.field(&self.schema, view.name) {
                            Some(tpe) => tpe,
                            None => {
                                let mut path = context.path.clone();
                                path.push(view.result_name.to_string());
                                return Outcome::err(vec![EvalError::NoRootField {
                                    tpe: context.tpe.to_string(),
                                    field: view.name.to_string(),
                                }
                                .to_problem()
                                .at_path(path)]);
                            }
                        };

                        let mut problems = Vec::new();
                        let (child_query, cursor) = attempt!(
                            self.mapping
                                .root_cursor(
                                    &context,
                                    view.name,
                                    Some(view.result_name),
                                    view.child,
                                    &env,
                                )
                                .await,
                            problems
                        );
                        let wrapped = Query::wrap(view.result_name, child_query);
                        self.run_value(&wrapped, &field_tpe, &cursor)
                            .with_problems(problems)
                    }
                    None => Outcome::fail(EvalError::BadRootQuery {
                        query: format!("{:?}", query),
                    }),
                },
            }
        }
        .boxed()
    }

    /// Both sides strip (through nullability and lists) to leaves, or to
    /// nominally equal types.
    fn cursor_compatible(&self, tpe: &Type, cursor_tpe: &Type) -> bool {
        let expected = tpe.stripped();
        let actual = cursor_tpe.stripped();
        (expected.is_leaf(&self.schema) && actual.is_leaf(&self.schema))
            || expected.nominal_eq(actual)
    }

    /// Evaluate `query` against `cursor` at the expected type `tpe`.
    fn run_value(&self, query: &Query, tpe: &Type, cursor: &Arc<dyn Cursor>) -> Outcome<ProtoJson> {
        if !self.cursor_compatible(tpe, cursor.tpe()) {
            failfast_debug!(
                "mismatched query and cursor type: expected {}, cursor at {}",
                tpe,
                cursor.tpe()
            );
            return Outcome::fail(EvalError::MismatchedQueryAndCursor {
                phase: "runValue".to_string(),
            });
        }

        match query {
            Query::Environment { env, child } => {
                self.run_value(child, tpe, &cursor.with_env(env))
            }

            Query::Wrap { name, child } => match &**child {
                // a wrapped component under a list distributes element-wise,
                // keeping the wrap around each element
                Query::Component { .. } if tpe.is_list() => {
                    let item = match tpe.item() {
                        Some(item) => item.clone(),
                        None => {
                            return Outcome::fail(EvalError::Stuck {
                                tpe: tpe.to_string(),
                                query: format!("{:?}", query),
                            })
                        }
                    };
                    let mut problems = Vec::new();
                    let elems = attempt!(cursor.as_list(), problems);
                    let mut out = Vec::with_capacity(elems.len());
                    for elem in elems {
                        out.push(attempt!(self.run_value(query, &item, &elem), problems));
                    }
                    Outcome::from_parts(Some(ProtoJson::from_values(out)), problems)
                }

                // a wrapped defer over absent data short-circuits to null
                Query::Defer { .. } => {
                    let mut problems = Vec::new();
                    if attempt!(cursor_absent(cursor), problems) {
                        return Outcome::from_parts(Some(ProtoJson::null()), problems);
                    }
                    self.run_value(child, tpe, cursor)
                        .map(|pj| ProtoJson::from_fields(vec![(name.clone(), pj)]))
                        .with_problems(problems)
                }

                _ => self
                    .run_value(child, tpe, cursor)
                    .map(|pj| ProtoJson::from_fields(vec![(name.clone(), pj)])),
            },

            Query::Component { interpreter, join, child } => {
                let (select, result_name) = match renamed_select_parts(child) {
                    Some(parts) => parts,
                    None => {
                        return Outcome::fail(EvalError::Stuck {
                            tpe: tpe.to_string(),
                            query: format!("{:?}", query),
                        })
                    }
                };

                // the staged subtree materializes the selected field, so it
                // runs at the field's declared type
                let field_tpe = select
                    .root_name()
                    .and_then(|name| tpe.field(&self.schema, name))
                    .unwrap_or_else(|| tpe.clone());

                let mut problems = Vec::new();
                let continuation = attempt!((**join)(cursor, select), problems);
                match continuation {
                    Query::Group(continuations) => {
                        let item_tpe = field_tpe.item().cloned().unwrap_or_else(|| field_tpe.clone());
                        let mut elems = Vec::with_capacity(continuations.len());
                        for continuation in continuations {
                            let root_name = match continuation.root_name() {
                                Some(name) => name.to_string(),
                                None => {
                                    problems.push(EvalError::BadJoinContinuation.to_problem());
                                    return Outcome::err(problems);
                                }
                            };
                            let staged = ProtoJson::staged(
                                interpreter.clone(),
                                continuation,
                                join_type(&root_name, item_tpe.clone()),
                                cursor.env().clone(),
                            );
                            elems.push(ProtoJson::select(staged, &root_name));
                        }
                        Outcome::from_parts(Some(ProtoJson::from_values(elems)), problems)
                    }

                    continuation => match continuation.rename_root(result_name) {
                        Some(renamed) => {
                            let staged = ProtoJson::staged(
                                interpreter.clone(),
                                renamed,
                                join_type(result_name, field_tpe),
                                cursor.env().clone(),
                            );
                            Outcome::from_parts(Some(staged), problems)
                        }
                        None => {
                            problems.push(EvalError::BadJoinContinuation.to_problem());
                            Outcome::err(problems)
                        }
                    },
                }
            }

            Query::Defer { join, child, root_tpe } => {
                let mut problems = Vec::new();
                if attempt!(cursor_absent(cursor), problems) {
                    return Outcome::from_parts(Some(ProtoJson::null()), problems);
                }
                let continuation = attempt!((**join)(cursor, child), problems);
                let staged = ProtoJson::staged(
                    self.self_handle(),
                    continuation,
                    root_tpe.clone(),
                    cursor.env().clone(),
                );
                Outcome::from_parts(Some(staged), problems)
            }

            Query::Unique(child) => {
                let mut problems = Vec::new();
                let pre = attempt!(cursor.preunique(), problems);
                let cursors = attempt!(pre.as_list(), problems);
                self.run_list(child, &tpe.non_null(), cursors, true, tpe.is_nullable())
                    .with_problems(problems)
            }

            _ => match tpe.dealias(&self.schema) {
                Dealiased::List(item) => {
                    let mut problems = Vec::new();
                    let cursors = attempt!(cursor.as_list(), problems);
                    self.run_list(query, item, cursors, false, false)
                        .with_problems(problems)
                }

                Dealiased::Nullable(inner) => {
                    let mut problems = Vec::new();
                    match attempt!(cursor.as_nullable(), problems) {
                        None => Outcome::from_parts(Some(ProtoJson::null()), problems),
                        Some(inner_cursor) => self
                            .run_value(query, inner, &inner_cursor)
                            .with_problems(problems),
                    }
                }

                Dealiased::Def(def) if def.is_leaf() => {
                    cursor.as_leaf().map(ProtoJson::from_json)
                }

                Dealiased::Def(def) if def.is_selectable() => self
                    .run_fields(query, tpe, cursor)
                    .map(ProtoJson::from_fields),

                _ => Outcome::fail(EvalError::Stuck {
                    tpe: tpe.to_string(),
                    query: format!("{:?}", query),
                }),
            },
        }
    }

    /// Evaluate a selection against an object-like cursor, producing the
    /// named fields in query order.
    fn run_fields(
        &self,
        query: &Query,
        tpe: &Type,
        cursor: &Arc<dyn Cursor>,
    ) -> Outcome<Vec<(String, ProtoJson)>> {
        match query {
            Query::Narrow { tpe: subtype, child } => {
                if !cursor.narrows_to(subtype) {
                    return Outcome::ok(Vec::new());
                }
                let mut problems = Vec::new();
                let narrowed = attempt!(cursor.narrow(subtype), problems);
                self.run_fields(child, &Type::named(subtype.clone()), &narrowed)
                    .with_problems(problems)
            }

            Query::Introspect(child) => self.run_typename(child, tpe, cursor),

            Query::Select { .. } | Query::Rename { .. } => {
                match renamed_select_parts(query) {
                    Some((select, result_name)) => {
                        self.run_select(query, select, result_name, tpe, cursor)
                    }
                    None => match query {
                        // aliases over wraps and counts rewrite in place
                        Query::Rename { name, child } => match &**child {
                            Query::Wrap { child: inner, .. } => self.run_fields(
                                &Query::wrap(name.clone(), (**inner).clone()),
                                tpe,
                                cursor,
                            ),
                            Query::Count { child: inner, .. } => self.run_fields(
                                &Query::count(name.clone(), (**inner).clone()),
                                tpe,
                                cursor,
                            ),
                            _ => Outcome::fail(EvalError::Stuck {
                                tpe: tpe.to_string(),
                                query: format!("{:?}", query),
                            }),
                        },
                        _ => Outcome::fail(EvalError::Stuck {
                            tpe: tpe.to_string(),
                            query: format!("{:?}", query),
                        }),
                    },
                }
            }

            Query::Wrap { name, child } => self
                .run_value(child, tpe, cursor)
                .map(|pj| vec![(name.clone(), pj)]),

            Query::Count { name, child } => match &**child {
                Query::Select { name: count_name, .. } => {
                    let mut problems = Vec::new();
                    let counted = attempt!(cursor.field(count_name, None), problems);
                    let count = attempt!(cardinality(&counted), problems);
                    Outcome::from_parts(
                        Some(vec![(name.clone(), ProtoJson::from_json(Value::from(count)))]),
                        problems,
                    )
                }
                _ => Outcome::fail(EvalError::Stuck {
                    tpe: tpe.to_string(),
                    query: format!("{:?}", query),
                }),
            },

            Query::Group(children) => {
                let mut problems = Vec::new();
                let mut fields = Vec::new();
                for child in children {
                    match self.run_fields(child, tpe, cursor) {
                        Outcome::Ok(mut fs) => fields.append(&mut fs),
                        Outcome::Mixed(mut fs, mut ps) => {
                            fields.append(&mut fs);
                            problems.append(&mut ps);
                        }
                        // a failed named sibling degrades to null rather
                        // than aborting the row
                        Outcome::Err(mut ps) => {
                            problems.append(&mut ps);
                            match child.root_name() {
                                Some(name) => fields.push((name.to_string(), ProtoJson::null())),
                                None => return Outcome::err(problems),
                            }
                        }
                    }
                }
                Outcome::from_parts(Some(fields), problems)
            }

            Query::Environment { env, child } => {
                self.run_fields(child, tpe, &cursor.with_env(env))
            }

            Query::Empty => Outcome::ok(Vec::new()),

            _ => {
                failfast_debug!("unhandled query shape in runFields: {:?}", query);
                Outcome::fail(EvalError::Stuck {
                    tpe: tpe.to_string(),
                    query: format!("{:?}", query),
                })
            }
        }
    }

    fn run_select(
        &self,
        query: &Query,
        select: &Query,
        result_name: &str,
        tpe: &Type,
        cursor: &Arc<dyn Cursor>,
    ) -> Outcome<Vec<(String, ProtoJson)>> {
        // field selections look through nullability; absent data yields a
        // null field
        if let Type::Nullable(inner) = tpe {
            let mut problems = Vec::new();
            return match attempt!(cursor.as_nullable(), problems) {
                None => Outcome::from_parts(
                    Some(vec![(result_name.to_string(), ProtoJson::null())]),
                    problems,
                ),
                Some(inner_cursor) => self
                    .run_fields(query, inner, &inner_cursor)
                    .with_problems(problems),
            };
        }

        let (field_name, child) = match select {
            Query::Select { name, child, .. } => (name.as_str(), &**child),
            _ => unreachable!("renamed_select_parts yields a Select; qed"),
        };

        let field_tpe = match tpe.field(&self.schema, field_name) {
            Some(field_tpe) => field_tpe,
            None => {
                return Outcome::fail(EvalError::NoField {
                    tpe: tpe.to_string(),
                    field: field_name.to_string(),
                })
            }
        };

        let mut problems = Vec::new();
        let field_cursor = attempt!(cursor.field(field_name, Some(result_name)), problems);
        let value = attempt!(self.run_value(child, &field_tpe, &field_cursor), problems);
        Outcome::from_parts(Some(vec![(result_name.to_string(), value)]), problems)
    }

    /// Resolve an inline `__typename` selection: the concrete type name of
    /// the cursor, using the schema's declaration order to break ties for
    /// interfaces and unions.
    fn run_typename(
        &self,
        child: &Query,
        tpe: &Type,
        cursor: &Arc<dyn Cursor>,
    ) -> Outcome<Vec<(String, ProtoJson)>> {
        let result_name = match renamed_select_parts(child) {
            Some((Query::Select { name, .. }, result_name)) if name == "__typename" => result_name,
            _ => {
                return Outcome::fail(EvalError::Stuck {
                    tpe: tpe.to_string(),
                    query: format!("{:?}", child),
                })
            }
        };

        let mut base = tpe;
        while let Type::Nullable(inner) = base {
            base = inner.as_ref();
        }

        let type_name = match base.dealias(&self.schema) {
            Dealiased::Def(NamedType::Object(object)) => Some(object.name.clone()),
            Dealiased::Def(def @ (NamedType::Interface(_) | NamedType::Union(_))) => self
                .schema
                .types()
                .iter()
                .filter_map(|candidate| match candidate {
                    NamedType::Object(object)
                        if self.schema.is_subtype(def.name(), &object.name)
                            && cursor.narrows_to(&object.name) =>
                    {
                        Some(object.name.clone())
                    }
                    _ => None,
                })
                .next(),
            _ => {
                return Outcome::fail(EvalError::NonSelectableTypename {
                    tpe: tpe.to_string(),
                })
            }
        };

        match type_name {
            Some(name) => Outcome::ok(vec![(
                result_name.to_string(),
                ProtoJson::from_json(Value::String(name)),
            )]),
            None => Outcome::problem(format!(
                "'__typename' cannot be resolved for type {}",
                tpe
            )),
        }
    }

    /// Evaluate a list: filter, order and slice the cursors, then
    /// materialize each element. Partial per-element problems accumulate;
    /// a pure failure aborts the whole list.
    fn run_list(
        &self,
        query: &Query,
        tpe: &Type,
        cursors: Vec<Arc<dyn Cursor>>,
        unique: bool,
        nullable: bool,
    ) -> Outcome<ProtoJson> {
        let mut problems = Vec::new();
        let mut cursors = cursors;
        let mut query = query;

        if let Query::FilterOrderByOffsetLimit { pred, order_by, offset, limit, child } = query {
            if let Some(pred) = pred {
                let mut filtered = Vec::with_capacity(cursors.len());
                for cursor in cursors {
                    if attempt!(pred.apply(&cursor), problems) {
                        filtered.push(cursor);
                    }
                }
                cursors = filtered;
            }

            if let Some(order_by) = order_by {
                cursors = attempt!(order_by.order(cursors), problems);
            }

            if let Some(offset) = offset {
                cursors = cursors.split_off((*offset).min(cursors.len()));
            }

            if let Some(limit) = limit {
                cursors.truncate(*limit);
            }

            query = &**child;
        }

        let mut results = Vec::with_capacity(cursors.len());
        for cursor in &cursors {
            if !self.cursor_compatible(tpe, cursor.tpe()) {
                problems.push(
                    EvalError::MismatchedQueryAndCursor { phase: "runList".to_string() }
                        .to_problem(),
                );
                return Outcome::err(problems);
            }
            match self.run_value(query, tpe, cursor) {
                Outcome::Ok(pj) => results.push(pj),
                Outcome::Mixed(pj, mut ps) => {
                    results.push(pj);
                    problems.append(&mut ps);
                }
                Outcome::Err(mut ps) => {
                    problems.append(&mut ps);
                    return Outcome::err(problems);
                }
            }
        }

        if !unique {
            return Outcome::from_parts(Some(ProtoJson::from_values(results)), problems);
        }

        if results.len() > 1 {
            problems.push(EvalError::MultipleMatches.to_problem());
            return Outcome::err(problems);
        }
        match results.pop() {
            Some(unique_value) => Outcome::from_parts(Some(unique_value), problems),
            None if nullable => Outcome::from_parts(Some(ProtoJson::null()), problems),
            None => {
                problems.push(EvalError::NoMatch.to_problem());
                Outcome::err(problems)
            }
        }
    }
}

#[async_trait]
impl Interpreter for QueryInterpreter {
    async fn run_root_value(
        &self,
        query: &Query,
        root_tpe: &Type,
        env: &Env,
    ) -> Outcome<ProtoJson> {
        trace!(root_tpe = %root_tpe, "evaluating root query");
        self.run_root_value0(query, Context::new(root_tpe.clone()), env.clone())
            .await
    }
}

fn cursor_absent(cursor: &Arc<dyn Cursor>) -> Outcome<bool> {
    if cursor.is_nullable() {
        cursor.as_nullable().map(|opt| opt.is_none())
    } else {
        Outcome::ok(false)
    }
}

/// Null counts 0, a list counts its length, anything else counts 1.
fn cardinality(cursor: &Arc<dyn Cursor>) -> Outcome<usize> {
    if cursor.is_nullable() {
        cursor.as_nullable().and_then(|opt| match opt {
            None => Outcome::ok(0),
            Some(inner) => cardinality(&inner),
        })
    } else if cursor.is_list() {
        cursor.as_list().map(|elems| elems.len())
    } else {
        Outcome::ok(1)
    }
}

fn staged_key(node: &Arc<StagedNode>) -> usize {
    Arc::as_ptr(node) as usize
}

fn interpreter_key(interpreter: &Arc<dyn Interpreter>) -> usize {
    Arc::as_ptr(interpreter) as *const () as usize
}

/// Collect every staged placeholder reachable in `pj`, deduplicated by
/// identity, in traversal order.
fn gather(pj: &ProtoJson, seen: &mut HashSet<usize>, out: &mut Vec<Arc<StagedNode>>) {
    match pj {
        ProtoJson::Concrete(_) => {}
        ProtoJson::Staged(node) => {
            if seen.insert(staged_key(node)) {
                out.push(node.clone());
            }
        }
        ProtoJson::Object(fields) => {
            for (_, field) in fields {
                gather(field, seen, out);
            }
        }
        ProtoJson::Array(elems) => {
            for elem in elems {
                gather(elem, seen, out);
            }
        }
        ProtoJson::Select(inner, _) => gather(inner, seen, out),
    }
}

/// Substitute completed placeholders into `pj`, producing concrete JSON.
/// Unpaired placeholders substitute to null.
fn scatter(pj: &ProtoJson, subst: &HashMap<usize, Value>) -> Value {
    match pj {
        ProtoJson::Concrete(value) => value.clone(),
        ProtoJson::Staged(node) => subst.get(&staged_key(node)).cloned().unwrap_or(Value::Null),
        ProtoJson::Object(fields) => {
            let mut object = Map::with_capacity(fields.len());
            for (name, field) in fields {
                let mut value = scatter(field, subst);
                // a deferred field that resolved to a single-field object
                // sheds its synthetic root wrapper and inlines into the
                // parent field
                if field.is_deferred() {
                    if let Value::Object(inner) = value {
                        if inner.len() == 1 {
                            value = inner
                                .into_iter()
                                .next()
                                .map(|(_, v)| v)
                                .unwrap_or(Value::Null);
                        } else {
                            value = Value::Object(inner);
                        }
                    }
                }
                object.insert(name.clone(), value);
            }
            Value::Object(object)
        }
        ProtoJson::Array(elems) => {
            Value::Array(elems.iter().map(|elem| scatter(elem, subst)).collect())
        }
        ProtoJson::Select(inner, field) => match scatter(inner, subst) {
            Value::Object(mut object) => object.remove(field).unwrap_or(Value::Null),
            _ => Value::Null,
        },
    }
}

/// Iteratively resolve every staged placeholder in `pjs` and return the
/// concrete values, aligned positionally, plus the accumulated problems.
///
/// Placeholders are gathered by identity, grouped by owning interpreter,
/// re-evaluated in batches (concurrently across interpreters), completed
/// recursively, and scattered back into the original trees.
pub fn complete_all(pjs: Vec<ProtoJson>) -> BoxFuture<'static, (Vec<Problem>, Vec<Value>)> {
    async move {
        let mut seen = HashSet::new();
        let mut staged = Vec::new();
        for pj in &pjs {
            gather(pj, &mut seen, &mut staged);
        }

        if staged.is_empty() {
            let subst = HashMap::new();
            return (
                Vec::new(),
                pjs.iter().map(|pj| scatter(pj, &subst)).collect(),
            );
        }

        // bucket by owning interpreter, preserving first-seen order
        let mut buckets: Vec<(Arc<dyn Interpreter>, Vec<Arc<StagedNode>>)> = Vec::new();
        let mut bucket_index: HashMap<usize, usize> = HashMap::new();
        for node in &staged {
            let key = interpreter_key(&node.interpreter);
            match bucket_index.get(&key).copied() {
                Some(position) => buckets[position].1.push(node.clone()),
                None => {
                    bucket_index.insert(key, buckets.len());
                    buckets.push((node.interpreter.clone(), vec![node.clone()]));
                }
            }
        }

        trace!(
            placeholders = staged.len(),
            interpreters = buckets.len(),
            "completing deferred subtrees"
        );

        let batch_results = future::join_all(buckets.iter().map(|(interpreter, nodes)| {
            let queries: Vec<RootQuery> = nodes
                .iter()
                .map(|node| RootQuery {
                    query: node.query.clone(),
                    tpe: node.root_tpe.clone(),
                    env: node.env.clone(),
                })
                .collect();
            let interpreter = interpreter.clone();
            async move { interpreter.run_root_values(&queries).await }
        }))
        .await;

        let mut problems = Vec::new();
        let mut ordered_nodes = Vec::new();
        let mut child_pjs = Vec::new();
        for ((_, nodes), (mut ps, values)) in buckets.iter().zip(batch_results) {
            problems.append(&mut ps);
            if nodes.len() != values.len() {
                failfast_error!(
                    "interpreter broke positional alignment: {} roots, {} values",
                    nodes.len(),
                    values.len()
                );
            }
            for (node, value) in nodes.iter().zip(values) {
                ordered_nodes.push(node.clone());
                child_pjs.push(value);
            }
        }

        // recurse until every returned subtree is concrete
        let (mut child_problems, child_values) = complete_all(child_pjs).await;
        problems.append(&mut child_problems);

        let mut subst: HashMap<usize, Value> = HashMap::with_capacity(ordered_nodes.len());
        for (node, value) in ordered_nodes.iter().zip(child_values) {
            subst.insert(staged_key(node), value);
        }

        let values = pjs.iter().map(|pj| scatter(pj, &subst)).collect();
        (problems, values)
    }
    .boxed()
}

/// Resolve a single tree to concrete JSON.
pub async fn complete(pj: ProtoJson) -> (Vec<Problem>, Value) {
    match pj {
        ProtoJson::Concrete(value) => (Vec::new(), value),
        deferred => {
            let (problems, mut values) = complete_all(vec![deferred]).await;
            (problems, values.pop().unwrap_or(Value::Null))
        }
    }
}
