//! Type model walker: classifies a described type and validates its shape.
//!
//! Models are pure functions of the type, so they are computed once and kept
//! for the process lifetime in a `TypeId` keyed cache.

use std::any::TypeId;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

use crate::{Describe, ScalarKind, SchemaError, TypeModel};

/// Per-type memo table shared by the walker, schema compiler and definition builder.
pub struct TypeCache<V> {
    map: RwLock<FxHashMap<TypeId, Arc<V>>>,
}

impl<V> TypeCache<V> {
    pub fn new() -> Self {
        Self { map: RwLock::new(FxHashMap::default()) }
    }

    pub fn get_or_try_insert<T, E, F>(&self, make: F) -> Result<Arc<V>, E>
    where
        T: 'static,
        F: FnOnce() -> Result<V, E>,
    {
        let id = TypeId::of::<T>();
        if let Some(v) = self.map.read().unwrap_or_else(|e| e.into_inner()).get(&id) {
            return Ok(v.clone());
        }
        // Built outside the lock; a racing builder produces an equal value.
        let value = Arc::new(make()?);
        let mut map = self.map.write().unwrap_or_else(|e| e.into_inner());
        Ok(map.entry(id).or_insert(value).clone())
    }

    pub fn len(&self) -> usize {
        self.map.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V> Default for TypeCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

static MODELS: Lazy<TypeCache<TypeModel>> = Lazy::new(TypeCache::new);

/// Classify `T`, failing with `UnsupportedShape` for shapes that cannot be represented.
pub fn classify<T: Describe + 'static>() -> Result<Arc<TypeModel>, SchemaError> {
    MODELS.get_or_try_insert::<T, _, _>(|| {
        let model = T::type_model();
        let type_name = match &model {
            TypeModel::Composite(c) => c.type_name,
            _ => std::any::type_name::<T>(),
        };
        validate(&model, type_name, "")?;
        Ok(model)
    })
}

/// Check a model that was not produced through `classify` (hand-built models).
pub fn validate(model: &TypeModel, type_name: &str, path: &str) -> Result<(), SchemaError> {
    let unsupported = |reason: String| SchemaError::UnsupportedShape {
        type_name: type_name.to_string(),
        path: if path.is_empty() { "/".to_string() } else { path.to_string() },
        reason,
    };
    match model {
        TypeModel::Scalar(_) => Ok(()),
        TypeModel::Optional(inner) => {
            if inner.is_optional() {
                return Err(unsupported("optional of optional has no distinct wire form".into()));
            }
            validate(inner, type_name, path)
        }
        TypeModel::Sequence { elem, .. } => validate(elem, type_name, &format!("{}/*", path)),
        TypeModel::Mapping { key, value } => {
            if *key != ScalarKind::String {
                return Err(unsupported(format!("mapping keys must be strings, found {}", key)));
            }
            validate(value, type_name, &format!("{}/*", path))
        }
        TypeModel::Composite(c) => {
            let mut seen = HashSet::new();
            for field in c.visible_fields() {
                if !seen.insert(field.wire_name()) {
                    return Err(SchemaError::UnsupportedShape {
                        type_name: c.type_name.to_string(),
                        path: format!("{}/{}", path, field.wire_name()),
                        reason: format!("more than one field resolves to wire name `{}`", field.wire_name()),
                    });
                }
                validate(&field.model, c.type_name, &format!("{}/{}", path, field.wire_name()))?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::{Composite, FieldMeta, Metadata, Value, ValueError};

    crate::describe! {
        #[derive(Debug, Clone, PartialEq)]
        struct Inner {
            #[field(wire = "v")]
            value: Option<i32>,
        }
    }

    crate::describe! {
        #[derive(Debug, Clone, PartialEq)]
        struct Outer {
            metadata: Metadata,
            tags: Vec<String>,
            inner: BTreeMap<String, Inner>,
        }
    }

    crate::describe! {
        #[derive(Debug)]
        struct IntKeyed {
            by_id: BTreeMap<i64, String>,
        }
    }

    struct Clashing;

    impl Describe for Clashing {
        fn type_model() -> TypeModel {
            TypeModel::Composite(
                Composite::new("Clashing")
                    .field("a", String::type_model(), FieldMeta::new().wire("x"))
                    .field("b", String::type_model(), FieldMeta::new().wire("x")),
            )
        }
        fn to_value(&self) -> Value {
            Value::Composite(vec![])
        }
        fn from_value(_: Value) -> Result<Self, ValueError> {
            Ok(Clashing)
        }
    }

    #[test]
    fn classifies_nested_shapes() {
        let model = classify::<Outer>().expect("classify");
        let c = model.as_composite().expect("composite");
        assert_eq!(c.type_name, "Outer");
        let shapes: Vec<_> = c.fields.iter().map(|f| (f.name, f.model.shape())).collect();
        assert_eq!(shapes, vec![("metadata", "composite"), ("tags", "sequence"), ("inner", "mapping")]);
        match &c.fields[2].model {
            TypeModel::Mapping { key, value } => {
                assert_eq!(*key, ScalarKind::String);
                let inner = value.as_composite().expect("inner composite");
                assert_eq!(inner.fields[0].wire_name(), "v");
                assert!(inner.fields[0].model.is_optional());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn classify_is_memoized() {
        let a = classify::<Outer>().expect("first");
        let b = classify::<Outer>().expect("second");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn non_string_map_keys_are_unsupported() {
        let err = classify::<IntKeyed>().unwrap_err();
        match err {
            SchemaError::UnsupportedShape { type_name, path, reason } => {
                assert_eq!(type_name, "IntKeyed");
                assert_eq!(path, "/by_id");
                assert!(reason.contains("mapping keys must be strings"), "{}", reason);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn nested_optional_is_unsupported() {
        let err = classify::<Option<Option<String>>>().unwrap_err();
        assert!(matches!(err, SchemaError::UnsupportedShape { .. }));
    }

    #[test]
    fn duplicate_wire_names_are_unsupported() {
        let err = classify::<Clashing>().unwrap_err();
        assert!(err.to_string().contains("wire name `x`"), "{}", err);
    }
}
