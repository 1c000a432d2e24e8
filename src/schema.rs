use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// A GraphQL type expression.
///
/// Types are non-null unless wrapped in [`Type::Nullable`]. References
/// between named types go through the schema table (`Named`) rather than
/// direct object references, so cyclic schemas (`City.country`,
/// `Country.cities`) need no special handling.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    /// A reference to a named type in the schema table.
    Named(String),

    /// A list of the inner type.
    List(Box<Type>),

    /// A nullable version of the inner type.
    Nullable(Box<Type>),

    /// An inline definition that is not registered in the schema table.
    /// Used for synthetic join roots wrapping staged subtrees.
    Inline(Arc<NamedType>),
}

/// The result of resolving a [`Type`] one step against a schema.
#[derive(Debug, Clone, Copy)]
pub enum Dealiased<'a> {
    List(&'a Type),
    Nullable(&'a Type),
    Def(&'a NamedType),
    /// A named reference absent from the schema table.
    Unknown(&'a str),
}

impl Type {
    pub fn named(name: impl Into<String>) -> Type {
        Type::Named(name.into())
    }

    pub fn list(inner: Type) -> Type {
        Type::List(Box::new(inner))
    }

    pub fn nullable(inner: Type) -> Type {
        match inner {
            already @ Type::Nullable(_) => already,
            other => Type::Nullable(Box::new(other)),
        }
    }

    /// Resolve named references one step; `List`/`Nullable` wrappers are
    /// reported as-is.
    pub fn dealias<'a>(&'a self, schema: &'a Schema) -> Dealiased<'a> {
        match self {
            Type::Named(name) => match schema.type_def(name) {
                Some(def) => Dealiased::Def(def),
                None => Dealiased::Unknown(name),
            },
            Type::Inline(def) => Dealiased::Def(def),
            Type::List(inner) => Dealiased::List(inner.as_ref()),
            Type::Nullable(inner) => Dealiased::Nullable(inner.as_ref()),
        }
    }

    /// Strip one level of nullability.
    pub fn non_null(&self) -> Type {
        match self {
            Type::Nullable(inner) => (**inner).clone(),
            other => other.clone(),
        }
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, Type::Nullable(_))
    }

    pub fn is_list(&self) -> bool {
        matches!(self.non_nullable(), Type::List(_))
    }

    /// The element type of a list (looking through nullability).
    pub fn item(&self) -> Option<&Type> {
        match self.non_nullable() {
            Type::List(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }

    /// `true` iff the underlying definition is a scalar or enum.
    pub fn is_leaf(&self, schema: &Schema) -> bool {
        match self.non_nullable().dealias(schema) {
            Dealiased::Def(def) => def.is_leaf(),
            _ => false,
        }
    }

    /// The name of the underlying named definition, if any.
    pub fn name(&self) -> Option<&str> {
        match self {
            Type::Named(name) => Some(name),
            Type::Inline(def) => Some(def.name()),
            Type::List(_) | Type::Nullable(_) => None,
        }
    }

    /// Look up a field's declared type on an object or interface.
    pub fn field(&self, schema: &Schema, name: &str) -> Option<Type> {
        match self.dealias(schema) {
            Dealiased::Def(def) => def.field(name).map(|f| f.tpe.clone()),
            Dealiased::Nullable(inner) => inner.field(schema, name),
            _ => None,
        }
    }

    /// Nominal equality modulo nullability.
    pub fn nominal_eq(&self, other: &Type) -> bool {
        match (self.non_nullable(), other.non_nullable()) {
            (Type::List(a), Type::List(b)) => a.nominal_eq(b),
            (a, b) => match (a.name(), b.name()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// The type with all `Nullable` and `List` layers removed.
    pub fn stripped(&self) -> &Type {
        match self {
            Type::Nullable(inner) | Type::List(inner) => inner.stripped(),
            other => other,
        }
    }

    fn non_nullable(&self) -> &Type {
        match self {
            Type::Nullable(inner) => inner.non_nullable(),
            other => other,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn base(tpe: &Type, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match tpe {
                Type::Named(name) => write!(f, "{}", name),
                Type::Inline(def) => write!(f, "{}", def.name()),
                Type::List(inner) => write!(f, "[{}]", inner),
                Type::Nullable(inner) => base(inner, f),
            }
        }

        match self {
            Type::Nullable(inner) => base(inner, f),
            other => {
                base(other, f)?;
                write!(f, "!")
            }
        }
    }
}

// Primitives are taken from scalars: https://spec.graphql.org/draft/#sec-Scalars
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarType {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumType {
    pub name: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub tpe: Type,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, tpe: Type) -> Self {
        FieldDef { name: name.into(), tpe }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectType {
    pub name: String,
    pub fields: Vec<FieldDef>,
    pub interfaces: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceType {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnionType {
    pub name: String,
    pub members: Vec<String>,
}

/// A named type definition in the schema table.
#[derive(Debug, Clone, PartialEq)]
pub enum NamedType {
    Scalar(ScalarType),
    Enum(EnumType),
    Object(ObjectType),
    Interface(InterfaceType),
    Union(UnionType),
}

impl NamedType {
    pub fn name(&self) -> &str {
        match self {
            NamedType::Scalar(s) => &s.name,
            NamedType::Enum(e) => &e.name,
            NamedType::Object(o) => &o.name,
            NamedType::Interface(i) => &i.name,
            NamedType::Union(u) => &u.name,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, NamedType::Scalar(_) | NamedType::Enum(_))
    }

    /// `true` for types `__typename` can be applied to.
    pub fn is_selectable(&self) -> bool {
        matches!(
            self,
            NamedType::Object(_) | NamedType::Interface(_) | NamedType::Union(_)
        )
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        let fields = match self {
            NamedType::Object(o) => &o.fields,
            NamedType::Interface(i) => &i.fields,
            _ => return None,
        };
        fields.iter().find(|f| f.name == name)
    }
}

/// An immutable schema: a declaration-ordered type table plus the root
/// operation types.
///
/// Declaration order is observable: interface and union member resolution
/// for `__typename` scans it front to back.
#[derive(Debug)]
pub struct Schema {
    types: Vec<NamedType>,
    index: HashMap<String, usize>,
    subtype_map: HashMap<String, HashSet<String>>,
    query_type: String,
    mutation_type: Option<String>,
}

const BUILT_IN_SCALARS: [&str; 5] = ["String", "Int", "Float", "Boolean", "ID"];

impl Schema {
    pub fn new(mut types: Vec<NamedType>, query_type: impl Into<String>) -> Arc<Schema> {
        for name in BUILT_IN_SCALARS {
            if !types.iter().any(|t| t.name() == name) {
                types.push(NamedType::Scalar(ScalarType { name: name.to_string() }));
            }
        }

        let index = types
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name().to_string(), i))
            .collect();

        // the logic of this algorithm is inspired from the npm package graphql:
        // https://github.com/graphql/graphql-js/blob/ac8f0c6b484a0d5dca2dc13c387247f96772580a/src/type/schema.ts#L302-L327
        let mut subtype_map: HashMap<String, HashSet<String>> = Default::default();
        for tpe in &types {
            match tpe {
                NamedType::Object(object) => {
                    for interface in &object.interfaces {
                        subtype_map
                            .entry(interface.clone())
                            .or_default()
                            .insert(object.name.clone());
                    }
                }
                NamedType::Union(union) => {
                    let set = subtype_map.entry(union.name.clone()).or_default();
                    for member in &union.members {
                        set.insert(member.clone());
                    }
                }
                _ => {}
            }
        }

        Arc::new(Schema {
            types,
            index,
            subtype_map,
            query_type: query_type.into(),
            mutation_type: None,
        })
    }

    pub fn with_mutation_type(&self, name: impl Into<String>) -> Arc<Schema> {
        Arc::new(Schema {
            types: self.types.clone(),
            index: self.index.clone(),
            subtype_map: self.subtype_map.clone(),
            query_type: self.query_type.clone(),
            mutation_type: Some(name.into()),
        })
    }

    pub fn type_def(&self, name: &str) -> Option<&NamedType> {
        self.index.get(name).map(|i| &self.types[*i])
    }

    /// All named types, in declaration order.
    pub fn types(&self) -> &[NamedType] {
        &self.types
    }

    pub fn query_type(&self) -> Type {
        Type::Named(self.query_type.clone())
    }

    pub fn mutation_type(&self) -> Option<Type> {
        self.mutation_type.as_ref().map(|name| Type::Named(name.clone()))
    }

    pub fn is_subtype(&self, abstract_type: &str, maybe_subtype: &str) -> bool {
        abstract_type == maybe_subtype
            || self
                .subtype_map
                .get(abstract_type)
                .map(|set| set.contains(maybe_subtype))
                .unwrap_or(false)
    }
}

/// The synthetic single-field object type a staged subtree is evaluated at:
/// the foreign interpreter produces `{field_name: <tpe value>}`.
pub fn join_type(field_name: &str, tpe: Type) -> Type {
    Type::Inline(Arc::new(NamedType::Object(ObjectType {
        name: format!("Join-{}", field_name),
        fields: vec![FieldDef::new(field_name, tpe)],
        interfaces: Vec::new(),
    })))
}
