//! Interface type descriptors and function schemas.
//!
//! A [`Schema`] is built once (programmatically or from JSON) and is read-only
//! afterwards. Aliases are resolved while the schema is built, so every
//! descriptor handed to the marshaling engine is a plain tree without
//! [`TypeDesc::Named`] nodes.
//!
//! ## JSON form
//!
//! ```json
//! {
//!   "types": [
//!     { "name": "point", "ty": { "record": [ { "name": "a", "ty": "u32" },
//!                                             { "name": "b", "ty": "u32" } ] } }
//!   ],
//!   "functions": [
//!     { "name": "mult", "params": [ { "name": "a", "ty": "s64" },
//!                                   { "name": "b", "ty": "s64" } ],
//!       "results": [ "s64" ] },
//!     { "name": "square_vec", "params": [ { "name": "val", "ty": { "list": "s64" } } ],
//!       "results": [ { "list": "s64" } ] }
//!   ]
//! }
//! ```

use crate::error::{Result, WitxError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Leaf interface types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scalar {
    Bool,
    S8,
    U8,
    S16,
    U16,
    S32,
    U32,
    S64,
    U64,
    F32,
    F64,
    Char,
    String,
}

impl Scalar {
    /// WITX spelling of the scalar.
    pub fn name(self) -> &'static str {
        match self {
            Scalar::Bool => "bool",
            Scalar::S8 => "s8",
            Scalar::U8 => "u8",
            Scalar::S16 => "s16",
            Scalar::U16 => "u16",
            Scalar::S32 => "s32",
            Scalar::U32 => "u32",
            Scalar::S64 => "s64",
            Scalar::U64 => "u64",
            Scalar::F32 => "f32",
            Scalar::F64 => "f64",
            Scalar::Char => "char",
            Scalar::String => "string",
        }
    }

    /// Inclusive value range of integer scalars.
    pub fn int_range(self) -> Option<(i128, i128)> {
        match self {
            Scalar::S8 => Some((i8::MIN.into(), i8::MAX.into())),
            Scalar::U8 => Some((0, u8::MAX.into())),
            Scalar::S16 => Some((i16::MIN.into(), i16::MAX.into())),
            Scalar::U16 => Some((0, u16::MAX.into())),
            Scalar::S32 => Some((i32::MIN.into(), i32::MAX.into())),
            Scalar::U32 => Some((0, u32::MAX.into())),
            Scalar::S64 => Some((i64::MIN.into(), i64::MAX.into())),
            Scalar::U64 => Some((0, u64::MAX.into())),
            _ => None,
        }
    }
}

/// Named record field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub ty: TypeDesc,
}

/// Variant case with an optional payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<TypeDesc>,
}

/// A type descriptor.
///
/// Field, case and flag order is part of the wire contract with the compiled
/// module and must match it exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeDesc {
    Tuple(Vec<TypeDesc>),
    Record(Vec<Field>),
    Variant(Vec<Case>),
    Enum(Vec<String>),
    Flags(Vec<String>),
    Option(Box<TypeDesc>),
    Result {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ok: Option<Box<TypeDesc>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        err: Option<Box<TypeDesc>>,
    },
    List(Box<TypeDesc>),
    Union(Vec<TypeDesc>),
    /// Reference to a type defined earlier in the schema
    Named(String),
    #[serde(untagged)]
    Scalar(Scalar),
}

impl TypeDesc {
    pub fn list(element: TypeDesc) -> TypeDesc {
        TypeDesc::List(Box::new(element))
    }

    pub fn option(inner: TypeDesc) -> TypeDesc {
        TypeDesc::Option(Box::new(inner))
    }

    pub fn result(ok: Option<TypeDesc>, err: Option<TypeDesc>) -> TypeDesc {
        TypeDesc::Result {
            ok: ok.map(Box::new),
            err: err.map(Box::new),
        }
    }

    pub fn record<I, S>(fields: I) -> TypeDesc
    where
        I: IntoIterator<Item = (S, TypeDesc)>,
        S: Into<String>,
    {
        TypeDesc::Record(
            fields
                .into_iter()
                .map(|(name, ty)| Field {
                    name: name.into(),
                    ty,
                })
                .collect(),
        )
    }

    pub fn variant<I, S>(cases: I) -> TypeDesc
    where
        I: IntoIterator<Item = (S, Option<TypeDesc>)>,
        S: Into<String>,
    {
        TypeDesc::Variant(
            cases
                .into_iter()
                .map(|(name, ty)| Case {
                    name: name.into(),
                    ty,
                })
                .collect(),
        )
    }

    pub fn enumeration<I, S>(names: I) -> TypeDesc
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TypeDesc::Enum(names.into_iter().map(Into::into).collect())
    }

    pub fn flags<I, S>(names: I) -> TypeDesc
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TypeDesc::Flags(names.into_iter().map(Into::into).collect())
    }

    /// True if no alias remains anywhere in the tree.
    pub fn is_resolved(&self) -> bool {
        match self {
            TypeDesc::Scalar(_) | TypeDesc::Enum(_) | TypeDesc::Flags(_) => true,
            TypeDesc::Named(_) => false,
            TypeDesc::Tuple(items) | TypeDesc::Union(items) => items.iter().all(Self::is_resolved),
            TypeDesc::Record(fields) => fields.iter().all(|f| f.ty.is_resolved()),
            TypeDesc::Variant(cases) => cases
                .iter()
                .all(|c| c.ty.as_ref().map_or(true, Self::is_resolved)),
            TypeDesc::Option(inner) | TypeDesc::List(inner) => inner.is_resolved(),
            TypeDesc::Result { ok, err } => {
                ok.as_deref().map_or(true, Self::is_resolved)
                    && err.as_deref().map_or(true, Self::is_resolved)
            }
        }
    }
}

impl From<Scalar> for TypeDesc {
    fn from(s: Scalar) -> Self {
        TypeDesc::Scalar(s)
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}", item)?;
            }
            Ok(())
        }

        match self {
            TypeDesc::Scalar(s) => f.write_str(s.name()),
            TypeDesc::Named(name) => f.write_str(name),
            TypeDesc::Tuple(items) => {
                f.write_str("tuple<")?;
                list(f, items)?;
                f.write_str(">")
            }
            TypeDesc::Union(items) => {
                f.write_str("union { ")?;
                list(f, items)?;
                f.write_str(" }")
            }
            TypeDesc::Record(fields) => {
                f.write_str("record { ")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", field.name, field.ty)?;
                }
                f.write_str(" }")
            }
            TypeDesc::Variant(cases) => {
                f.write_str("variant { ")?;
                for (i, case) in cases.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match &case.ty {
                        Some(ty) => write!(f, "{}({})", case.name, ty)?,
                        None => f.write_str(&case.name)?,
                    }
                }
                f.write_str(" }")
            }
            TypeDesc::Enum(names) => {
                f.write_str("enum { ")?;
                list(f, names)?;
                f.write_str(" }")
            }
            TypeDesc::Flags(names) => {
                f.write_str("flags { ")?;
                list(f, names)?;
                f.write_str(" }")
            }
            TypeDesc::Option(inner) => write!(f, "option<{}>", inner),
            TypeDesc::List(inner) => write!(f, "list<{}>", inner),
            TypeDesc::Result { ok, err } => {
                f.write_str("expected<")?;
                match ok {
                    Some(ty) => write!(f, "{}", ty)?,
                    None => f.write_str("_")?,
                }
                f.write_str(", ")?;
                match err {
                    Some(ty) => write!(f, "{}", ty)?,
                    None => f.write_str("_")?,
                }
                f.write_str(">")
            }
        }
    }
}

/// Named function parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: TypeDesc,
}

/// One exported function: name, ordered parameters, ordered results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSignature {
    pub name: String,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default)]
    pub results: Vec<TypeDesc>,
}

impl FunctionSignature {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            results: Vec::new(),
        }
    }

    /// Builder: append a parameter
    pub fn param(mut self, name: impl Into<String>, ty: impl Into<TypeDesc>) -> Self {
        self.params.push(Param {
            name: name.into(),
            ty: ty.into(),
        });
        self
    }

    /// Builder: append a result
    pub fn result(mut self, ty: impl Into<TypeDesc>) -> Self {
        self.results.push(ty.into());
        self
    }
}

impl fmt::Display for FunctionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: function(", self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", p.name, p.ty)?;
        }
        f.write_str(")")?;
        match self.results.as_slice() {
            [] => Ok(()),
            [single] => write!(f, " -> {}", single),
            many => {
                f.write_str(" -> (")?;
                for (i, r) in many.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", r)?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Type alias definition in a schema document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDef {
    pub name: String,
    pub ty: TypeDesc,
}

#[derive(Debug, Deserialize)]
struct SchemaDocument {
    #[serde(default)]
    types: Vec<TypeDef>,
    #[serde(default)]
    functions: Vec<FunctionSignature>,
}

/// Validated, alias-resolved set of type definitions and function signatures.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    types: Vec<(String, Arc<TypeDesc>)>,
    functions: Vec<Arc<FunctionSignature>>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a schema from its JSON form.
    pub fn from_json(json: &str) -> Result<Self> {
        let doc: SchemaDocument = serde_json::from_str(json)?;
        let mut schema = Schema::new();
        for def in doc.types {
            schema.define_type(def.name, def.ty)?;
        }
        for func in doc.functions {
            schema.add_function(func)?;
        }
        Ok(schema)
    }

    /// Load a schema from a JSON file.
    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Define an alias. `ty` may only refer to names defined before it.
    pub fn define_type(&mut self, name: impl Into<String>, ty: TypeDesc) -> Result<()> {
        let name = name.into();
        if self.type_def(&name).is_some() {
            return Err(WitxError::DuplicateDefinition(name));
        }
        let resolved = self.resolve(&ty)?;
        validate(&resolved)?;
        self.types.push((name, Arc::new(resolved)));
        Ok(())
    }

    /// Add a function, resolving aliases in its parameters and results.
    pub fn add_function(&mut self, sig: FunctionSignature) -> Result<()> {
        if self.function(&sig.name).is_some() {
            return Err(WitxError::DuplicateDefinition(sig.name));
        }
        let mut names = HashSet::new();
        let mut params = Vec::with_capacity(sig.params.len());
        for p in sig.params {
            if !names.insert(p.name.clone()) {
                return Err(WitxError::InvalidSchema(format!(
                    "duplicate parameter '{}' in '{}'",
                    p.name, sig.name
                )));
            }
            let ty = self.resolve(&p.ty)?;
            validate(&ty)?;
            params.push(Param { name: p.name, ty });
        }
        let mut results = Vec::with_capacity(sig.results.len());
        for r in &sig.results {
            let ty = self.resolve(r)?;
            validate(&ty)?;
            results.push(ty);
        }
        self.functions.push(Arc::new(FunctionSignature {
            name: sig.name,
            params,
            results,
        }));
        Ok(())
    }

    /// Replace every alias in `ty` by its (already resolved) definition.
    pub fn resolve(&self, ty: &TypeDesc) -> Result<TypeDesc> {
        Ok(match ty {
            TypeDesc::Named(name) => self
                .type_def(name)
                .map(|t| t.as_ref().clone())
                .ok_or_else(|| WitxError::UndefinedType(name.clone()))?,
            TypeDesc::Scalar(s) => TypeDesc::Scalar(*s),
            TypeDesc::Enum(n) => TypeDesc::Enum(n.clone()),
            TypeDesc::Flags(n) => TypeDesc::Flags(n.clone()),
            TypeDesc::Tuple(items) => TypeDesc::Tuple(self.resolve_all(items)?),
            TypeDesc::Union(items) => TypeDesc::Union(self.resolve_all(items)?),
            TypeDesc::Record(fields) => TypeDesc::Record(
                fields
                    .iter()
                    .map(|f| {
                        Ok(Field {
                            name: f.name.clone(),
                            ty: self.resolve(&f.ty)?,
                        })
                    })
                    .collect::<Result<_>>()?,
            ),
            TypeDesc::Variant(cases) => TypeDesc::Variant(
                cases
                    .iter()
                    .map(|c| {
                        Ok(Case {
                            name: c.name.clone(),
                            ty: c.ty.as_ref().map(|t| self.resolve(t)).transpose()?,
                        })
                    })
                    .collect::<Result<_>>()?,
            ),
            TypeDesc::Option(inner) => TypeDesc::option(self.resolve(inner)?),
            TypeDesc::List(inner) => TypeDesc::list(self.resolve(inner)?),
            TypeDesc::Result { ok, err } => TypeDesc::result(
                ok.as_deref().map(|t| self.resolve(t)).transpose()?,
                err.as_deref().map(|t| self.resolve(t)).transpose()?,
            ),
        })
    }

    fn resolve_all(&self, items: &[TypeDesc]) -> Result<Vec<TypeDesc>> {
        items.iter().map(|t| self.resolve(t)).collect()
    }

    /// Resolved definition of an alias.
    pub fn type_def(&self, name: &str) -> Option<&Arc<TypeDesc>> {
        self.types.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    /// Alias names in definition order.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.iter().map(|(n, _)| n.as_str())
    }

    /// Look up a function by name.
    pub fn function(&self, name: &str) -> Option<&Arc<FunctionSignature>> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Functions in declaration order.
    pub fn functions(&self) -> &[Arc<FunctionSignature>] {
        &self.functions
    }
}

fn check_unique<'a>(what: &str, names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(WitxError::InvalidSchema(format!("duplicate {} '{}'", what, name)));
        }
    }
    Ok(())
}

fn validate(ty: &TypeDesc) -> Result<()> {
    match ty {
        TypeDesc::Scalar(_) => Ok(()),
        TypeDesc::Named(name) => Err(WitxError::UnresolvedType(name.clone())),
        TypeDesc::Tuple(items) => items.iter().try_for_each(validate),
        TypeDesc::Union(items) => {
            if items.is_empty() {
                return Err(WitxError::InvalidSchema("union without cases".into()));
            }
            items.iter().try_for_each(validate)
        }
        TypeDesc::Record(fields) => {
            check_unique("field", fields.iter().map(|f| f.name.as_str()))?;
            fields.iter().try_for_each(|f| validate(&f.ty))
        }
        TypeDesc::Variant(cases) => {
            if cases.is_empty() {
                return Err(WitxError::InvalidSchema("variant without cases".into()));
            }
            check_unique("case", cases.iter().map(|c| c.name.as_str()))?;
            cases.iter().filter_map(|c| c.ty.as_ref()).try_for_each(validate)
        }
        TypeDesc::Enum(names) => {
            if names.is_empty() {
                return Err(WitxError::InvalidSchema("enum without cases".into()));
            }
            check_unique("enum case", names.iter().map(String::as_str))
        }
        TypeDesc::Flags(names) => check_unique("flag", names.iter().map(String::as_str)),
        TypeDesc::Option(inner) => validate(inner),
        TypeDesc::List(inner) => {
            validate(inner)?;
            if inner.size() == 0 {
                return Err(crate::abi::zero_sized_list());
            }
            Ok(())
        }
        TypeDesc::Result { ok, err } => {
            ok.as_deref().map_or(Ok(()), validate)?;
            err.as_deref().map_or(Ok(()), validate)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point() -> TypeDesc {
        TypeDesc::record([("a", Scalar::U32.into()), ("b", Scalar::U32.into())])
    }

    #[test]
    fn test_alias_resolution() {
        let mut schema = Schema::new();
        schema.define_type("point", point()).unwrap();
        schema
            .define_type("points", TypeDesc::list(TypeDesc::Named("point".into())))
            .unwrap();

        let resolved = schema.type_def("points").unwrap();
        assert_eq!(**resolved, TypeDesc::list(point()));
        assert!(resolved.is_resolved());
    }

    #[test]
    fn test_forward_and_self_reference_rejected() {
        let mut schema = Schema::new();
        let err = schema
            .define_type("node", TypeDesc::list(TypeDesc::Named("node".into())))
            .unwrap_err();
        assert!(matches!(err, WitxError::UndefinedType(ref n) if n == "node"));

        let err = schema
            .define_type("a", TypeDesc::option(TypeDesc::Named("b".into())))
            .unwrap_err();
        assert!(matches!(err, WitxError::UndefinedType(ref n) if n == "b"));
    }

    #[test]
    fn test_duplicates_rejected() {
        let mut schema = Schema::new();
        schema.define_type("point", point()).unwrap();
        assert!(matches!(
            schema.define_type("point", point()),
            Err(WitxError::DuplicateDefinition(_))
        ));

        let bad = TypeDesc::record([("a", Scalar::U8.into()), ("a", Scalar::U8.into())]);
        assert!(matches!(schema.define_type("bad", bad), Err(WitxError::InvalidSchema(_))));

        schema.add_function(FunctionSignature::new("f")).unwrap();
        assert!(matches!(
            schema.add_function(FunctionSignature::new("f")),
            Err(WitxError::DuplicateDefinition(_))
        ));
    }

    #[test]
    fn test_empty_variant_rejected() {
        let mut schema = Schema::new();
        let err = schema.define_type("v", TypeDesc::Variant(vec![])).unwrap_err();
        assert!(matches!(err, WitxError::InvalidSchema(_)));
    }

    #[test]
    fn test_list_of_zero_sized_elements_rejected() {
        let mut schema = Schema::new();
        let err = schema
            .define_type("units", TypeDesc::list(TypeDesc::Tuple(vec![])))
            .unwrap_err();
        assert!(matches!(err, WitxError::InvalidSchema(_)));

        let sig = FunctionSignature::new("f").result(TypeDesc::list(TypeDesc::Flags(vec![])));
        assert!(matches!(schema.add_function(sig), Err(WitxError::InvalidSchema(_))));

        schema.define_type("unit", TypeDesc::Record(vec![])).unwrap();
        let sig = FunctionSignature::new("g")
            .param("xs", TypeDesc::list(TypeDesc::Named("unit".into())));
        assert!(matches!(schema.add_function(sig), Err(WitxError::InvalidSchema(_))));
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "types": [
                { "name": "point", "ty": { "record": [
                    { "name": "a", "ty": "u32" },
                    { "name": "b", "ty": "u32" } ] } }
            ],
            "functions": [
                { "name": "mult",
                  "params": [ { "name": "a", "ty": "s64" }, { "name": "b", "ty": "s64" } ],
                  "results": [ "s64" ] },
                { "name": "square_vec",
                  "params": [ { "name": "val", "ty": { "list": "s64" } } ],
                  "results": [ { "list": "s64" } ] },
                { "name": "swap",
                  "params": [ { "name": "p", "ty": { "named": "point" } } ],
                  "results": [ { "named": "point" },
                               { "result": { "err": "string" } } ] }
            ]
        }"#;

        let schema = Schema::from_json(json).unwrap();
        assert_eq!(schema.type_names().collect::<Vec<_>>(), vec!["point"]);
        assert_eq!(schema.functions().len(), 3);

        let mult = schema.function("mult").unwrap();
        assert_eq!(mult.to_string(), "mult: function(a: s64, b: s64) -> s64");

        let sq = schema.function("square_vec").unwrap();
        assert_eq!(sq.results[0], TypeDesc::list(Scalar::S64.into()));

        let swap = schema.function("swap").unwrap();
        assert_eq!(swap.params[0].ty, point());
        assert_eq!(swap.results[1], TypeDesc::result(None, Some(Scalar::String.into())));
        let point = "record { a: u32, b: u32 }";
        assert_eq!(
            swap.to_string(),
            format!("swap: function(p: {point}) -> ({point}, expected<_, string>)")
        );
    }

    #[test]
    fn test_from_json_undefined_alias() {
        let json = r#"{ "functions": [
            { "name": "f", "params": [ { "name": "x", "ty": { "named": "missing" } } ] } ] }"#;
        assert!(matches!(
            Schema::from_json(json),
            Err(WitxError::UndefinedType(ref n)) if n == "missing"
        ));
    }

    #[test]
    fn test_json_round_trip_of_descriptor() {
        let ty = TypeDesc::variant([
            ("none", None),
            ("some", Some(TypeDesc::Tuple(vec![Scalar::F32.into(), Scalar::Char.into()]))),
        ]);
        let json = serde_json::to_string(&ty).unwrap();
        let back: TypeDesc = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ty);
    }
}
