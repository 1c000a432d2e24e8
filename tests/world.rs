//! End-to-end tests over a two-backend "world" dataset: cities live in one
//! mapping, countries in another, and `City.country` is stitched across
//! them through staged subtrees.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use quilt_core::prelude::*;
use quilt_core::{
    join_type, EvalError, FieldDef, InterfaceType, JoinFn, NamedType, ObjectType,
};

fn world_schema() -> Arc<Schema> {
    Schema::new(
        vec![
            NamedType::Object(ObjectType {
                name: "Query".to_string(),
                fields: vec![
                    FieldDef::new("city", Type::nullable(Type::named("City"))),
                    FieldDef::new("cities", Type::list(Type::named("City"))),
                    FieldDef::new("country", Type::nullable(Type::named("Country"))),
                    FieldDef::new("countries", Type::list(Type::named("Country"))),
                ],
                interfaces: vec![],
            }),
            NamedType::Object(ObjectType {
                name: "Mutation".to_string(),
                fields: vec![
                    FieldDef::new("updatePopulation", Type::nullable(Type::named("City"))),
                    FieldDef::new("createCity", Type::nullable(Type::named("City"))),
                ],
                interfaces: vec![],
            }),
            NamedType::Object(ObjectType {
                name: "City".to_string(),
                fields: vec![
                    FieldDef::new("id", Type::named("Int")),
                    FieldDef::new("name", Type::named("String")),
                    FieldDef::new("population", Type::named("Int")),
                    FieldDef::new("countryCode", Type::named("String")),
                    FieldDef::new("country", Type::named("Country")),
                    FieldDef::new("neighbors", Type::list(Type::named("Country"))),
                ],
                interfaces: vec![],
            }),
            NamedType::Object(ObjectType {
                name: "Country".to_string(),
                fields: vec![
                    FieldDef::new("code", Type::named("String")),
                    FieldDef::new("name", Type::named("String")),
                ],
                interfaces: vec![],
            }),
        ],
        "Query",
    )
    .with_mutation_type("Mutation")
}

fn city_rows() -> Value {
    json!([
        {"id": 1, "name": "Kabul", "population": 1780000, "countryCode": "AFG"},
        {"id": 2, "name": "Qandahar", "population": 237500, "countryCode": "AFG"},
        {"id": 3, "name": "Herat", "population": 186800, "countryCode": "AFG"},
        {"id": 4, "name": "New York", "population": 8008278, "countryCode": "USA"},
    ])
}

fn country_rows() -> Value {
    json!([
        {"code": "AFG", "name": "Afghanistan"},
        {"code": "USA", "name": "United States"},
    ])
}

fn city_mapping() -> Arc<ValueMapping> {
    ValueMapping::new(
        world_schema(),
        json!({"city": city_rows(), "cities": city_rows()}),
    )
}

fn country_mapping() -> Arc<ValueMapping> {
    ValueMapping::new(
        world_schema(),
        json!({"country": country_rows(), "countries": country_rows()}),
    )
}

/// The join for `City.country`: read the parent's country code and select
/// the matching country on the other interpreter.
fn country_join() -> JoinFn {
    Arc::new(|cursor, child| {
        let projection = match child {
            Query::Select { child, .. } => (**child).clone(),
            _ => Query::Empty,
        };
        Term::unique_path(&["countryCode"]).apply(cursor).map(move |code| {
            Query::select(
                "country",
                Query::unique(Query::filter(
                    Predicate::Eql(Term::unique_path(&["code"]), Term::Const(code)),
                    projection,
                )),
            )
        })
    })
}

fn country_field(country: &Arc<QueryInterpreter>, projection: Query) -> Query {
    Query::wrap(
        "country",
        Query::Component {
            interpreter: country.clone() as Arc<dyn Interpreter>,
            join: country_join(),
            child: Box::new(Query::select("country", projection)),
        },
    )
}

fn city_projection(country: &Arc<QueryInterpreter>) -> Query {
    Query::Group(vec![
        Query::select("name", Query::Empty),
        Query::select("population", Query::Empty),
        country_field(country, Query::select("name", Query::Empty)),
    ])
}

fn unique_city(id: i64, projection: Query) -> Query {
    Query::select(
        "city",
        Query::unique(Query::filter(
            Predicate::Eql(Term::unique_path(&["id"]), Term::constant(id)),
            projection,
        )),
    )
}

fn query_root() -> Type {
    Type::named("Query")
}

async fn run_json(interpreter: &Arc<QueryInterpreter>, query: &Query, root: &Type) -> Value {
    let response = interpreter.run(query, root, Env::new()).await;
    serde_json::to_value(&response).unwrap()
}

#[tokio::test]
async fn simple_field_read() {
    let city = city_mapping().interpreter();
    let query = unique_city(2, Query::select("name", Query::Empty));
    assert_eq!(
        run_json(&city, &query, &query_root()).await,
        json!({"data": {"city": {"name": "Qandahar"}}})
    );
}

#[tokio::test]
async fn aliased_field_read() {
    let city = city_mapping().interpreter();
    let query = Query::rename("second", unique_city(2, Query::select("name", Query::Empty)));
    assert_eq!(
        run_json(&city, &query, &query_root()).await,
        json!({"data": {"second": {"name": "Qandahar"}}})
    );
}

#[test_log::test(tokio::test)]
async fn cross_mapping_read_stitches_country() {
    let country = country_mapping().interpreter();
    let city = city_mapping().interpreter();
    let query = unique_city(2, city_projection(&country));
    let response = city.run(&query, &query_root(), Env::new()).await;
    // exact serialization checks field order: query order, stitched
    // subtree in place
    assert_eq!(
        serde_json::to_string(&response).unwrap(),
        r#"{"data":{"city":{"name":"Qandahar","population":237500,"country":{"name":"Afghanistan"}}}}"#
    );
}

#[tokio::test]
async fn group_join_continuations_produce_parallel_slices() {
    let country = country_mapping().interpreter();
    let city = city_mapping().interpreter();

    let neighbors_join: JoinFn = Arc::new(|_cursor, _child| {
        let by_code = |code: &str| {
            Query::select(
                "country",
                Query::unique(Query::filter(
                    Predicate::Eql(Term::unique_path(&["code"]), Term::constant(code)),
                    Query::select("name", Query::Empty),
                )),
            )
        };
        Outcome::ok(Query::Group(vec![by_code("AFG"), by_code("USA")]))
    });

    let query = unique_city(
        2,
        Query::Group(vec![
            Query::select("name", Query::Empty),
            Query::wrap(
                "neighbors",
                Query::Component {
                    interpreter: country.clone() as Arc<dyn Interpreter>,
                    join: neighbors_join,
                    child: Box::new(Query::select("neighbors", Query::Empty)),
                },
            ),
        ]),
    );

    assert_eq!(
        run_json(&city, &query, &query_root()).await,
        json!({"data": {"city": {
            "name": "Qandahar",
            "neighbors": [{"name": "Afghanistan"}, {"name": "United States"}],
        }}})
    );
}

#[tokio::test]
async fn unique_with_no_match_and_nullable_yields_null() {
    let city = city_mapping().interpreter();
    let query = unique_city(99, Query::select("name", Query::Empty));
    assert_eq!(
        run_json(&city, &query, &query_root()).await,
        json!({"data": {"city": null}})
    );
}

#[tokio::test]
async fn unique_with_multiple_matches_is_an_error() {
    let city = city_mapping().interpreter();
    let query = Query::select(
        "city",
        Query::unique(Query::filter(
            Predicate::Eql(Term::unique_path(&["countryCode"]), Term::constant("AFG")),
            Query::select("name", Query::Empty),
        )),
    );
    assert_eq!(
        run_json(&city, &query, &query_root()).await,
        json!({"errors": [{"message": "Multiple matches"}], "data": null})
    );
}

#[tokio::test]
async fn filter_order_offset_limit() {
    let ranked = ValueMapping::new(
        world_schema(),
        json!({"cities": [
            {"id": 1, "name": "A", "population": 10, "countryCode": "AFG"},
            {"id": 2, "name": "B", "population": 50, "countryCode": "AFG"},
            {"id": 3, "name": "C", "population": 30, "countryCode": "AFG"},
            {"id": 4, "name": "D", "population": 20, "countryCode": "AFG"},
            {"id": 5, "name": "E", "population": 40, "countryCode": "AFG"},
        ]}),
    )
    .interpreter();

    let query = Query::select(
        "cities",
        Query::FilterOrderByOffsetLimit {
            pred: Some(Predicate::Gt(
                Term::unique_path(&["population"]),
                Term::constant(15),
            )),
            order_by: Some(OrderSelections(vec![OrderSelection::descending(
                Term::unique_path(&["population"]),
            )])),
            offset: Some(1),
            limit: Some(2),
            child: Box::new(Query::select("population", Query::Empty)),
        },
    );

    let response = ranked.run(&query, &query_root(), Env::new()).await;
    assert_eq!(
        serde_json::to_string(&response).unwrap(),
        r#"{"data":{"cities":[{"population":40},{"population":30}]}}"#
    );
}

/// A mutable city store: mutations side-effect it through `root_cursor`
/// and defer their projection to the next stage, re-reading the store.
struct MutableWorld {
    schema: Arc<Schema>,
    store: Mutex<Vec<Value>>,
}

impl MutableWorld {
    fn new() -> Arc<MutableWorld> {
        let rows = match city_rows() {
            Value::Array(rows) => rows,
            _ => unreachable!("city_rows is an array; qed"),
        };
        Arc::new(MutableWorld {
            schema: world_schema(),
            store: Mutex::new(rows),
        })
    }

    fn city_reread(id: i64, child: &Query) -> Query {
        Query::select(
            "city",
            Query::unique(Query::filter(
                Predicate::Eql(Term::unique_path(&["id"]), Term::constant(id)),
                child.clone(),
            )),
        )
    }

    fn deferred_city(id: i64, child: &Query) -> Query {
        let join: JoinFn =
            Arc::new(move |_cursor, child| Outcome::ok(Self::city_reread(id, child)));
        Query::Defer {
            join,
            child: Box::new(child.clone()),
            root_tpe: join_type("city", Type::nullable(Type::named("City"))),
        }
    }
}

#[async_trait]
impl Mapping for MutableWorld {
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
        match field_name {
            "city" => {
                let rows = Value::Array(self.store.lock().unwrap().clone());
                let cursor = ValueCursor::new(
                    self.schema.clone(),
                    Type::list(Type::named("City")),
                    rows,
                    env.clone(),
                );
                Outcome::ok((child.clone(), Arc::new(cursor) as Arc<dyn Cursor>))
            }

            "updatePopulation" => {
                let id = env.get("id").and_then(Value::as_i64).unwrap_or(0);
                let population = env.get("population").cloned().unwrap_or(Value::Null);

                let mut updated = Value::Null;
                {
                    let mut store = self.store.lock().unwrap();
                    for row in store.iter_mut() {
                        if row.get("id").and_then(Value::as_i64) == Some(id) {
                            row["population"] = population.clone();
                            updated = row.clone();
                        }
                    }
                }

                let cursor = ValueCursor::new(
                    self.schema.clone(),
                    Type::nullable(Type::named("City")),
                    updated,
                    env.clone(),
                );
                Outcome::ok((
                    Self::deferred_city(id, child),
                    Arc::new(cursor) as Arc<dyn Cursor>,
                ))
            }

            "createCity" => {
                let row;
                {
                    let mut store = self.store.lock().unwrap();
                    let new_id = store
                        .iter()
                        .filter_map(|r| r.get("id").and_then(Value::as_i64))
                        .max()
                        .unwrap_or(0)
                        + 1;
                    row = json!({
                        "id": new_id,
                        "name": env.get("name").cloned().unwrap_or(Value::Null),
                        "population": env.get("population").cloned().unwrap_or(Value::Null),
                        "countryCode": env.get("countryCode").cloned().unwrap_or(Value::Null),
                    });
                    store.push(row.clone());
                }

                // the projection can only be keyed once the inserted row's
                // id exists, so it is elaborated in the deferred stage
                let id = row.get("id").and_then(Value::as_i64).unwrap_or(0);
                let cursor = ValueCursor::new(
                    self.schema.clone(),
                    Type::nullable(Type::named("City")),
                    row,
                    env.clone(),
                );
                Outcome::ok((
                    Self::deferred_city(id, child),
                    Arc::new(cursor) as Arc<dyn Cursor>,
                ))
            }

            _ => Outcome::fail(EvalError::NoRootField {
                tpe: context.tpe.to_string(),
                field: field_name.to_string(),
            }),
        }
    }
}

#[test_log::test(tokio::test)]
async fn update_mutation_stages_and_stitches() {
    let world = MutableWorld::new();
    let mutation = QueryInterpreter::new(world.clone() as Arc<dyn Mapping>);
    let country = country_mapping().interpreter();

    let query = Query::environment(
        Env::new().add("id", json!(2)).add("population", json!(12345)),
        Query::select("updatePopulation", city_projection(&country)),
    );
    let response = mutation.run(&query, &Type::named("Mutation"), Env::new()).await;
    assert_eq!(
        serde_json::to_string(&response).unwrap(),
        r#"{"data":{"updatePopulation":{"name":"Qandahar","population":12345,"country":{"name":"Afghanistan"}}}}"#
    );

    // the store itself was mutated: a plain read sees the new population
    let reread = unique_city(2, Query::select("population", Query::Empty));
    assert_eq!(
        run_json(&mutation, &reread, &query_root()).await,
        json!({"data": {"city": {"population": 12345}}})
    );
}

#[tokio::test]
async fn update_of_missing_row_yields_null() {
    let world = MutableWorld::new();
    let mutation = QueryInterpreter::new(world as Arc<dyn Mapping>);
    let country = country_mapping().interpreter();

    let query = Query::environment(
        Env::new().add("id", json!(99)).add("population", json!(1)),
        Query::select("updatePopulation", city_projection(&country)),
    );
    assert_eq!(
        run_json(&mutation, &query, &Type::named("Mutation")).await,
        json!({"data": null})
    );
}

#[tokio::test]
async fn create_mutation_elaborates_projection_after_insert() {
    let world = MutableWorld::new();
    let mutation = QueryInterpreter::new(world.clone() as Arc<dyn Mapping>);
    let country = country_mapping().interpreter();

    let query = Query::environment(
        Env::new()
            .add("name", json!("Wiggum"))
            .add("countryCode", json!("USA"))
            .add("population", json!(789)),
        Query::select("createCity", city_projection(&country)),
    );
    assert_eq!(
        run_json(&mutation, &query, &Type::named("Mutation")).await,
        json!({"data": {"createCity": {
            "name": "Wiggum",
            "population": 789,
            "country": {"name": "United States"},
        }}})
    );

    // the inserted row is visible to subsequent reads
    let reread = unique_city(5, Query::select("name", Query::Empty));
    assert_eq!(
        run_json(&mutation, &reread, &query_root()).await,
        json!({"data": {"city": {"name": "Wiggum"}}})
    );
}

#[tokio::test]
async fn counts_interpret_cardinality() {
    let schema = Schema::new(
        vec![
            NamedType::Object(ObjectType {
                name: "Query".to_string(),
                fields: vec![
                    FieldDef::new("country", Type::nullable(Type::named("Country"))),
                    FieldDef::new("orphan", Type::nullable(Type::named("Country"))),
                ],
                interfaces: vec![],
            }),
            NamedType::Object(ObjectType {
                name: "Country".to_string(),
                fields: vec![
                    FieldDef::new("name", Type::named("String")),
                    FieldDef::new(
                        "cities",
                        Type::nullable(Type::list(Type::named("City"))),
                    ),
                ],
                interfaces: vec![],
            }),
            NamedType::Object(ObjectType {
                name: "City".to_string(),
                fields: vec![FieldDef::new("name", Type::named("String"))],
                interfaces: vec![],
            }),
        ],
        "Query",
    );

    let mapping = ValueMapping::new(
        schema,
        json!({
            "country": {"name": "Afghanistan", "cities": [{"name": "Kabul"}, {"name": "Qandahar"}]},
            "orphan": {"name": "Atlantis", "cities": null},
        }),
    )
    .interpreter();

    let selection = |count_alias: &str| {
        Query::Group(vec![
            Query::select("name", Query::Empty),
            Query::count(count_alias, Query::select("cities", Query::Empty)),
        ])
    };

    let query = Query::Group(vec![
        Query::select("country", selection("cityCount")),
        Query::select("orphan", selection("cityCount")),
    ]);

    assert_eq!(
        run_json(&mapping, &query, &query_root()).await,
        json!({"data": {
            "country": {"name": "Afghanistan", "cityCount": 2},
            "orphan": {"name": "Atlantis", "cityCount": 0},
        }})
    );
}

#[tokio::test]
async fn narrowing_and_typename_over_an_interface() {
    let schema = Schema::new(
        vec![
            NamedType::Object(ObjectType {
                name: "Query".to_string(),
                fields: vec![FieldDef::new("places", Type::list(Type::named("Place")))],
                interfaces: vec![],
            }),
            NamedType::Interface(InterfaceType {
                name: "Place".to_string(),
                fields: vec![FieldDef::new("name", Type::named("String"))],
            }),
            NamedType::Object(ObjectType {
                name: "City".to_string(),
                fields: vec![
                    FieldDef::new("name", Type::named("String")),
                    FieldDef::new("population", Type::named("Int")),
                ],
                interfaces: vec!["Place".to_string()],
            }),
            NamedType::Object(ObjectType {
                name: "Country".to_string(),
                fields: vec![FieldDef::new("name", Type::named("String"))],
                interfaces: vec!["Place".to_string()],
            }),
        ],
        "Query",
    );

    let mapping = ValueMapping::new(
        schema,
        json!({"places": [
            {"__typename": "City", "name": "Qandahar", "population": 237500},
            {"__typename": "Country", "name": "Afghanistan"},
        ]}),
    )
    .interpreter();

    let query = Query::select(
        "places",
        Query::Group(vec![
            Query::Introspect(Box::new(Query::select("__typename", Query::Empty))),
            Query::select("name", Query::Empty),
            Query::narrow("City", Query::select("population", Query::Empty)),
        ]),
    );

    assert_eq!(
        run_json(&mapping, &query, &query_root()).await,
        json!({"data": {"places": [
            {"__typename": "City", "name": "Qandahar", "population": 237500},
            {"__typename": "Country", "name": "Afghanistan"},
        ]}})
    );
}

#[tokio::test]
async fn introspection_roots_mix_with_regular_roots() {
    let city = city_mapping().interpreter();
    let query = Query::Group(vec![
        Query::Introspect(Box::new(Query::select("__typename", Query::Empty))),
        unique_city(2, Query::select("name", Query::Empty)),
    ]);
    let response = city.run(&query, &query_root(), Env::new()).await;
    assert_eq!(
        serde_json::to_string(&response).unwrap(),
        r#"{"data":{"__typename":"Query","city":{"name":"Qandahar"}}}"#
    );
}

#[tokio::test]
async fn failed_sibling_degrades_to_null() {
    let city = city_mapping().interpreter();
    // the bad sibling nulls out, the name sibling still lands
    let query = unique_city(
        2,
        Query::Group(vec![
            Query::select("name", Query::Empty),
            Query::select("missing", Query::Empty),
        ]),
    );
    let value = run_json(&city, &query, &query_root()).await;
    assert_eq!(
        value,
        json!({
            "errors": [{"message": "Type City! has no field 'missing'"}],
            "data": {"city": {"name": "Qandahar", "missing": null}},
        })
    );
}
