use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::cursor::{Cursor, Env};
use crate::error::{EvalError, Outcome};
use crate::interpreter::QueryInterpreter;
use crate::query::Query;
use crate::schema::{Schema, Type};

/// The root evaluation context a mapping sees when producing a root
/// cursor.
#[derive(Debug, Clone)]
pub struct Context {
    /// The root type the query is addressed to.
    pub tpe: Type,
    /// The result path from the response root to this point.
    pub path: Vec<String>,
}

impl Context {
    pub fn new(tpe: Type) -> Context {
        Context { tpe, path: Vec::new() }
    }
}

/// A backend adapter: a schema, plus a way to obtain the cursor for a root
/// field.
///
/// `root_cursor` may rewrite the child query before evaluation (for
/// example a mutation elaborating its projection once the inserted row's
/// key is known) and may side-effect the backing store; the core treats
/// queries and mutations identically.
#[async_trait]
pub trait Mapping: Send + Sync {
    fn schema(&self) -> Arc<Schema>;

    async fn root_cursor(
        &self,
        context: &Context,
        field_name: &str,
        result_name: Option<&str>,
        child: &Query,
        env: &Env,
    ) -> Outcome<(Query, Arc<dyn Cursor>)>;
}

/// A [`Mapping`] over an in-memory JSON document keyed by root field name.
pub struct ValueMapping {
    schema: Arc<Schema>,
    data: Value,
    interpreter: OnceLock<Arc<QueryInterpreter>>,
}

impl ValueMapping {
    pub fn new(schema: Arc<Schema>, data: Value) -> Arc<ValueMapping> {
        Arc::new(ValueMapping {
            schema,
            data,
            interpreter: OnceLock::new(),
        })
    }

    /// The memoized interpreter bound to this mapping.
    pub fn interpreter(self: Arc<Self>) -> Arc<QueryInterpreter> {
        self.interpreter
            .get_or_init(|| QueryInterpreter::new(self.clone()))
            .clone()
    }
}

#[async_trait]
impl Mapping for ValueMapping {
    fn schema(&self) -> Arc<Schema> {
        self.schema.clone()
    }

    async fn root_cursor(
        &self,
        context: &Context,
        field_name: &str,
        _result_name: Option<&str>,
        child: &Query,
        env: &Env,
    ) -> Outcome<(Query, Arc<dyn Cursor>)> {
        let field_tpe = match context.tpe.field(&self.schema, field_name) {
            Some(tpe) => tpe,
            None => {
                return Outcome::fail(EvalError::NoRootField {
                    tpe: context.tpe.to_string(),
                    field: field_name.to_string(),
                })
            }
        };

        let focus = self.data.get(field_name).cloned().unwrap_or(Value::Null);
        let tpe = reconcile_list_shape(field_tpe, &focus);
        let cursor: Arc<dyn Cursor> =
            Arc::new(ValueCursor::new(self.schema.clone(), tpe, focus, env.clone()));
        Outcome::ok((child.clone(), cursor))
    }
}

/// Many rows behind a singular field: when the data is an array but the
/// declared type is not a list, the cursor runs at list type and a
/// `Unique` wrapper in the query narrows it back down.
fn reconcile_list_shape(tpe: Type, focus: &Value) -> Type {
    if focus.is_array() && !tpe.is_list() {
        Type::list(tpe.non_null())
    } else {
        tpe
    }
}

/// A cursor over in-memory JSON.
#[derive(Debug, Clone)]
pub struct ValueCursor {
    schema: Arc<Schema>,
    tpe: Type,
    focus: Value,
    env: Env,
}

impl ValueCursor {
    pub fn new(schema: Arc<Schema>, tpe: Type, focus: Value, env: Env) -> ValueCursor {
        ValueCursor { schema, tpe, focus, env }
    }

    fn at(&self, tpe: Type, focus: Value) -> Arc<dyn Cursor> {
        Arc::new(ValueCursor {
            schema: self.schema.clone(),
            tpe,
            focus,
            env: self.env.clone(),
        })
    }
}

impl Cursor for ValueCursor {
    fn tpe(&self) -> &Type {
        &self.tpe
    }

    fn env(&self) -> &Env {
        &self.env
    }

    fn with_env(&self, env: &Env) -> Arc<dyn Cursor> {
        Arc::new(ValueCursor {
            schema: self.schema.clone(),
            tpe: self.tpe.clone(),
            focus: self.focus.clone(),
            env: self.env.merge(env),
        })
    }

    fn is_leaf(&self) -> bool {
        self.tpe.is_leaf(&self.schema)
    }

    fn as_leaf(&self) -> Outcome<Value> {
        if self.is_leaf() {
            Outcome::ok(self.focus.clone())
        } else {
            Outcome::problem(format!("Expected Scalar type, found {}", self.tpe))
        }
    }

    fn is_nullable(&self) -> bool {
        self.tpe.is_nullable()
    }

    fn as_nullable(&self) -> Outcome<Option<Arc<dyn Cursor>>> {
        match &self.tpe {
            Type::Nullable(inner) => {
                if self.focus.is_null() {
                    Outcome::ok(None)
                } else {
                    Outcome::ok(Some(self.at((**inner).clone(), self.focus.clone())))
                }
            }
            other => Outcome::problem(format!("Expected Nullable type, found {}", other)),
        }
    }

    fn is_list(&self) -> bool {
        self.tpe.is_list()
    }

    fn as_list(&self) -> Outcome<Vec<Arc<dyn Cursor>>> {
        let item = match self.tpe.item() {
            Some(item) => item.clone(),
            None => {
                return Outcome::problem(format!("Expected List type, found {}", self.tpe))
            }
        };
        match self.focus.as_array() {
            Some(elems) => Outcome::ok(
                elems
                    .iter()
                    .map(|elem| self.at(item.clone(), elem.clone()))
                    .collect(),
            ),
            None => Outcome::problem(format!("Expected List value, found {}", self.focus)),
        }
    }

    fn field(&self, name: &str, _result_name: Option<&str>) -> Outcome<Arc<dyn Cursor>> {
        let field_tpe = match self.tpe.field(&self.schema, name) {
            Some(tpe) => tpe,
            None => {
                return Outcome::fail(EvalError::NoField {
                    tpe: self.tpe.to_string(),
                    field: name.to_string(),
                })
            }
        };
        let object = match self.focus.as_object() {
            Some(object) => object,
            None => {
                return Outcome::problem(format!(
                    "Expected Object value for field '{}', found {}",
                    name, self.focus
                ))
            }
        };
        let focus = object.get(name).cloned().unwrap_or(Value::Null);
        let tpe = reconcile_list_shape(field_tpe, &focus);
        Outcome::ok(self.at(tpe, focus))
    }

    fn narrows_to(&self, tpe_name: &str) -> bool {
        match self.focus.get("__typename").and_then(Value::as_str) {
            Some(discriminator) => discriminator == tpe_name,
            None => self.tpe.stripped().name() == Some(tpe_name),
        }
    }

    fn narrow(&self, tpe_name: &str) -> Outcome<Arc<dyn Cursor>> {
        if !self.narrows_to(tpe_name) {
            return Outcome::problem(format!("Cannot narrow {} to {}", self.tpe, tpe_name));
        }
        Outcome::ok(self.at(Type::named(tpe_name), self.focus.clone()))
    }

    fn preunique(&self) -> Outcome<Arc<dyn Cursor>> {
        Outcome::ok(Arc::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::{flat_list_path, leaf_value, list_path};
    use crate::schema::{FieldDef, NamedType, ObjectType};
    use serde_json::json;

    fn schema() -> Arc<Schema> {
        Schema::new(
            vec![
                NamedType::Object(ObjectType {
                    name: "Query".to_string(),
                    fields: vec![FieldDef::new(
                        "country",
                        Type::nullable(Type::named("Country")),
                    )],
                    interfaces: vec![],
                }),
                NamedType::Object(ObjectType {
                    name: "Country".to_string(),
                    fields: vec![
                        FieldDef::new("name", Type::named("String")),
                        FieldDef::new("cities", Type::list(Type::named("City"))),
                    ],
                    interfaces: vec![],
                }),
                NamedType::Object(ObjectType {
                    name: "City".to_string(),
                    fields: vec![
                        FieldDef::new("name", Type::named("String")),
                        FieldDef::new("population", Type::named("Int")),
                    ],
                    interfaces: vec![],
                }),
            ],
            "Query",
        )
    }

    fn country_cursor() -> Arc<dyn Cursor> {
        Arc::new(ValueCursor::new(
            schema(),
            Type::named("Country"),
            json!({
                "name": "Afghanistan",
                "cities": [
                    {"name": "Kabul", "population": 1780000},
                    {"name": "Qandahar", "population": 237500},
                ],
            }),
            Env::new(),
        ))
    }

    #[test]
    fn field_navigation() {
        let country = country_cursor();
        let name = country.field("name", None).value().unwrap();
        assert!(name.is_leaf());
        assert_eq!(name.as_leaf(), Outcome::Ok(json!("Afghanistan")));

        assert!(country.field("missing", None).is_err());
    }

    #[test]
    fn list_navigation() {
        let country = country_cursor();
        let cities = country.field("cities", None).value().unwrap();
        assert!(cities.is_list());
        let elems = cities.as_list().value().unwrap();
        assert_eq!(elems.len(), 2);
        assert_eq!(
            elems[1].field("name", None).value().unwrap().as_leaf(),
            Outcome::Ok(json!("Qandahar"))
        );
    }

    #[test]
    fn array_data_behind_singular_field_runs_at_list_type() {
        let schema = schema();
        let query_cursor = ValueCursor::new(
            schema,
            Type::named("Query"),
            json!({"country": [{"name": "A"}, {"name": "B"}]}),
            Env::new(),
        );
        let country = query_cursor.field("country", None).value().unwrap();
        assert!(country.is_list());
    }

    #[test]
    fn path_walkers_flatten_lists() {
        let country = country_cursor();
        let path = ["cities".to_string(), "population".to_string()];
        let cursors = list_path(&country, &path).value().unwrap();
        assert_eq!(cursors.len(), 2);
        assert_eq!(leaf_value(&cursors[0]), Outcome::Ok(json!(1780000)));

        let flat = flat_list_path(&country, &["cities".to_string()]).value().unwrap();
        assert_eq!(flat.len(), 2);
    }

    #[test]
    fn unique_path_term_reads_scalars() {
        use crate::predicate::Term;
        let country = country_cursor();
        assert_eq!(
            Term::unique_path(&["name"]).apply(&country),
            Outcome::Ok(json!("Afghanistan"))
        );
        // two cities reachable: not unique
        assert!(Term::unique_path(&["cities", "name"]).apply(&country).is_err());
        assert_eq!(
            Term::list_path(&["cities", "population"]).apply(&country),
            Outcome::Ok(json!([1780000, 237500]))
        );
    }

    #[test]
    fn contains_over_a_list_path() {
        use crate::predicate::{Predicate, Term};
        let country = country_cursor();
        let contains = |name: &str| Predicate::Contains {
            list: Term::list_path(&["cities", "name"]),
            elem: Term::constant(name),
        };
        assert_eq!(contains("Kabul").apply(&country), Outcome::Ok(true));
        assert_eq!(contains("Lima").apply(&country), Outcome::Ok(false));
    }

    #[test]
    fn narrowing_uses_typename_discriminator() {
        let schema = schema();
        let with_discriminator = ValueCursor::new(
            schema.clone(),
            Type::named("Country"),
            json!({"__typename": "City", "name": "Kabul"}),
            Env::new(),
        );
        assert!(with_discriminator.narrows_to("City"));
        assert!(!with_discriminator.narrows_to("Country"));

        let without = ValueCursor::new(
            schema,
            Type::named("Country"),
            json!({"name": "Afghanistan"}),
            Env::new(),
        );
        assert!(without.narrows_to("Country"));
        assert!(!without.narrows_to("City"));
    }
}
