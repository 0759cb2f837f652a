use base64::Engine;
use kope_core::{ScalarKind, TypeModel, Value};
use serde_json::{Map, Number, Value as Json};

use crate::error::{Location, MarshalError};

pub(crate) fn encode(model: &TypeModel, value: Value, at: &Location) -> Result<Json, MarshalError> {
    match model {
        TypeModel::Scalar(kind) => scalar(*kind, value, at),
        TypeModel::Optional(inner) => match value {
            Value::Null => Ok(Json::Null),
            v => encode(inner, v, at),
        },
        TypeModel::Sequence { elem, .. } => match value {
            // `None` elements stay as `null` so positions survive.
            Value::Sequence(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| encode(elem, item, &at.index(i)))
                .collect::<Result<Vec<_>, _>>()
                .map(Json::Array),
            other => Err(at.shape_error("sequence", other.variant())),
        },
        TypeModel::Mapping { value: elem, .. } => match value {
            // `None` values stay as `null` so keys survive.
            Value::Mapping(entries) => {
                let mut map = Map::new();
                for (key, item) in entries {
                    let json = encode(elem, item, &at.child(&key))?;
                    map.insert(key, json);
                }
                Ok(Json::Object(map))
            }
            other => Err(at.shape_error("mapping", other.variant())),
        },
        TypeModel::Composite(c) => {
            let at = at.within(c.type_name);
            let mut values = match value {
                Value::Composite(values) => values,
                other => return Err(at.shape_error("composite", other.variant())),
            };
            let mut map = Map::new();
            for field in c.visible_fields() {
                let wire = field.wire_name();
                let item = match values.iter().position(|(name, _)| *name == field.name) {
                    Some(pos) => values.swap_remove(pos).1,
                    None => Value::Null,
                };
                if item.is_null() {
                    if field.model.is_optional() {
                        continue;
                    }
                    return Err(at.child(wire).missing(wire));
                }
                let json = encode(&field.model, item, &at.child(wire))?;
                map.insert(wire.to_string(), json);
            }
            Ok(Json::Object(map))
        }
    }
}

fn scalar(kind: ScalarKind, value: Value, at: &Location) -> Result<Json, MarshalError> {
    match (kind, value) {
        (ScalarKind::String, Value::String(s)) => Ok(Json::String(s)),
        (ScalarKind::Boolean, Value::Boolean(b)) => Ok(Json::Bool(b)),
        (ScalarKind::Integer, Value::Integer(n)) => Ok(Json::Number(n.into())),
        (ScalarKind::Float, Value::Float(f)) => Number::from_f64(f)
            .map(Json::Number)
            .ok_or_else(|| at.type_error("finite float", f.to_string())),
        (ScalarKind::Float, Value::Integer(n)) => Ok(Json::Number(n.into())),
        (ScalarKind::Binary, Value::Binary(bytes)) => {
            Ok(Json::String(base64::engine::general_purpose::STANDARD.encode(bytes)))
        }
        (ScalarKind::BigNumber, Value::BigNumber(n)) => Ok(Json::Number(n)),
        (ScalarKind::BigNumber, Value::Integer(n)) => Ok(Json::Number(n.into())),
        (kind, other) => Err(at.type_error(kind.as_str(), other.variant())),
    }
}
