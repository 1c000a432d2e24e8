//! A naive introspection subset.
//!
//! Introspection roots are answered by a built-in interpreter over a JSON
//! rendering of the host schema, precomputed from the schema table. Nested
//! type references are shallow (kind and name only); full recursive
//! introspection data is out of scope.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::interpreter::QueryInterpreter;
use crate::mapping::ValueMapping;
use crate::schema::{EnumType, FieldDef, NamedType, ObjectType, Schema, Type};

/// The root type introspection roots are evaluated at.
pub fn root_type() -> Type {
    Type::Named("__Introspection".to_string())
}

/// The meta-schema describing introspection results.
pub fn meta_schema() -> Arc<Schema> {
    fn object(name: &str, fields: Vec<FieldDef>) -> NamedType {
        NamedType::Object(ObjectType {
            name: name.to_string(),
            fields,
            interfaces: Vec::new(),
        })
    }

    Schema::new(
        vec![
            object(
                "__Introspection",
                vec![
                    FieldDef::new("__schema", Type::named("__Schema")),
                    FieldDef::new("__type", Type::nullable(Type::named("__Type"))),
                    FieldDef::new("__typename", Type::named("String")),
                ],
            ),
            object(
                "__Schema",
                vec![
                    FieldDef::new("queryType", Type::named("__Type")),
                    FieldDef::new("mutationType", Type::nullable(Type::named("__Type"))),
                    FieldDef::new("types", Type::list(Type::named("__Type"))),
                ],
            ),
            object(
                "__Type",
                vec![
                    FieldDef::new("kind", Type::named("__TypeKind")),
                    FieldDef::new("name", Type::nullable(Type::named("String"))),
                    FieldDef::new("fields", Type::nullable(Type::list(Type::named("__Field")))),
                    FieldDef::new(
                        "interfaces",
                        Type::nullable(Type::list(Type::named("__Type"))),
                    ),
                    FieldDef::new(
                        "possibleTypes",
                        Type::nullable(Type::list(Type::named("__Type"))),
                    ),
                    FieldDef::new(
                        "enumValues",
                        Type::nullable(Type::list(Type::named("__EnumValue"))),
                    ),
                    FieldDef::new("ofType", Type::nullable(Type::named("__Type"))),
                ],
            ),
            object(
                "__Field",
                vec![
                    FieldDef::new("name", Type::named("String")),
                    FieldDef::new("type", Type::named("__Type")),
                ],
            ),
            object("__EnumValue", vec![FieldDef::new("name", Type::named("String"))]),
            NamedType::Enum(EnumType {
                name: "__TypeKind".to_string(),
                values: ["SCALAR", "OBJECT", "INTERFACE", "UNION", "ENUM", "LIST", "NON_NULL"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            }),
        ],
        "__Introspection",
    )
}

/// The built-in interpreter answering introspection roots for `schema`.
pub fn interpreter(schema: &Arc<Schema>) -> Arc<QueryInterpreter> {
    let types = Value::Array(
        schema
            .types()
            .iter()
            .map(|def| type_def_json(def, schema))
            .collect(),
    );

    let query_type = schema.query_type();
    let query_name = query_type.name().unwrap_or("Query");
    let mutation = schema
        .mutation_type()
        .and_then(|tpe| tpe.name().map(|name| shallow_ref(name, schema)))
        .unwrap_or(Value::Null);

    let data = json!({
        "__typename": query_name,
        "__schema": {
            "queryType": shallow_ref(query_name, schema),
            "mutationType": mutation,
            "types": types.clone(),
        },
        "__type": types,
    });

    ValueMapping::new(meta_schema(), data).interpreter()
}

fn kind_of(def: &NamedType) -> &'static str {
    match def {
        NamedType::Scalar(_) => "SCALAR",
        NamedType::Enum(_) => "ENUM",
        NamedType::Object(_) => "OBJECT",
        NamedType::Interface(_) => "INTERFACE",
        NamedType::Union(_) => "UNION",
    }
}

fn shallow_ref(name: &str, schema: &Schema) -> Value {
    let kind = schema.type_def(name).map(kind_of).unwrap_or("SCALAR");
    json!({"kind": kind, "name": name, "ofType": null})
}

/// Render a type expression the way introspection spells it: non-null and
/// list wrappers become `NON_NULL`/`LIST` nodes chained through `ofType`.
fn type_ref(tpe: &Type, schema: &Schema) -> Value {
    match tpe {
        Type::Nullable(inner) => base_ref(inner, schema),
        other => json!({"kind": "NON_NULL", "name": null, "ofType": base_ref(other, schema)}),
    }
}

fn base_ref(tpe: &Type, schema: &Schema) -> Value {
    match tpe {
        Type::Nullable(inner) => base_ref(inner, schema),
        Type::List(inner) => json!({"kind": "LIST", "name": null, "ofType": type_ref(inner, schema)}),
        named => match named.name() {
            Some(name) => shallow_ref(name, schema),
            None => Value::Null,
        },
    }
}

fn type_def_json(def: &NamedType, schema: &Schema) -> Value {
    let fields = match def {
        NamedType::Object(object) => Some(&object.fields),
        NamedType::Interface(interface) => Some(&interface.fields),
        _ => None,
    };
    let fields = fields
        .map(|fields| {
            Value::Array(
                fields
                    .iter()
                    .map(|f| json!({"name": f.name, "type": type_ref(&f.tpe, schema)}))
                    .collect(),
            )
        })
        .unwrap_or(Value::Null);

    let interfaces = match def {
        NamedType::Object(object) => Value::Array(
            object
                .interfaces
                .iter()
                .map(|name| shallow_ref(name, schema))
                .collect(),
        ),
        _ => Value::Null,
    };

    let possible_types = match def {
        NamedType::Union(union) => Value::Array(
            union
                .members
                .iter()
                .map(|name| shallow_ref(name, schema))
                .collect(),
        ),
        NamedType::Interface(interface) => Value::Array(
            schema
                .types()
                .iter()
                .filter_map(|candidate| match candidate {
                    NamedType::Object(object) if object.interfaces.contains(&interface.name) => {
                        Some(shallow_ref(&object.name, schema))
                    }
                    _ => None,
                })
                .collect(),
        ),
        _ => Value::Null,
    };

    let enum_values = match def {
        NamedType::Enum(enum_type) => Value::Array(
            enum_type
                .values
                .iter()
                .map(|value| json!({"name": value}))
                .collect(),
        ),
        _ => Value::Null,
    };

    json!({
        "kind": kind_of(def),
        "name": def.name(),
        "fields": fields,
        "interfaces": interfaces,
        "possibleTypes": possible_types,
        "enumValues": enum_values,
        "ofType": null,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::Env;
    use crate::interpreter::Interpreter;
    use crate::proto_json::ProtoJson;
    use crate::query::Query;

    fn host_schema() -> Arc<Schema> {
        Schema::new(
            vec![
                NamedType::Object(ObjectType {
                    name: "Query".to_string(),
                    fields: vec![FieldDef::new("city", Type::nullable(Type::named("City")))],
                    interfaces: vec![],
                }),
                NamedType::Object(ObjectType {
                    name: "City".to_string(),
                    fields: vec![FieldDef::new("name", Type::named("String"))],
                    interfaces: vec![],
                }),
            ],
            "Query",
        )
    }

    #[tokio::test]
    async fn typename_root_resolves_to_query_type() {
        let interpreter = interpreter(&host_schema());
        let outcome = interpreter
            .run_root_value(
                &Query::select("__typename", Query::Empty),
                &root_type(),
                &Env::new(),
            )
            .await;
        assert_eq!(
            outcome,
            crate::error::Outcome::Ok(ProtoJson::from_json(
                serde_json::json!({"__typename": "Query"})
            ))
        );
    }

    #[tokio::test]
    async fn schema_types_are_listed_in_declaration_order() {
        let interpreter = interpreter(&host_schema());
        let query = Query::select(
            "__schema",
            Query::select(
                "types",
                Query::Group(vec![
                    Query::select("name", Query::Empty),
                    Query::select("kind", Query::Empty),
                ]),
            ),
        );
        let outcome = interpreter
            .run_root_value(&query, &root_type(), &Env::new())
            .await;
        let pj = outcome.value().unwrap();
        let value = match pj {
            ProtoJson::Concrete(value) => value,
            other => panic!("expected concrete introspection data, got {:?}", other),
        };
        let types = value["__schema"]["types"].as_array().unwrap();
        assert_eq!(types[0], serde_json::json!({"name": "Query", "kind": "OBJECT"}));
        // built-in scalars follow the declared types
        assert!(types
            .iter()
            .any(|t| t == &serde_json::json!({"name": "String", "kind": "SCALAR"})));
    }

    #[test]
    fn type_refs_render_non_null_and_list_wrappers() {
        let schema = host_schema();
        assert_eq!(
            type_ref(&Type::named("City"), &schema),
            json!({"kind": "NON_NULL", "name": null, "ofType": {"kind": "OBJECT", "name": "City", "ofType": null}})
        );
        assert_eq!(
            type_ref(&Type::nullable(Type::named("City")), &schema),
            json!({"kind": "OBJECT", "name": "City", "ofType": null})
        );
    }
}
