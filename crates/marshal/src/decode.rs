use base64::Engine;
use kope_core::{ScalarKind, TypeModel, Value};
use serde_json::Value as Json;

use crate::error::{Location, MarshalError};

fn kind_of(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

pub(crate) fn decode(model: &TypeModel, json: &Json, at: &Location) -> Result<Value, MarshalError> {
    match model {
        TypeModel::Scalar(kind) => scalar(*kind, json, at),
        TypeModel::Optional(inner) => match json {
            Json::Null => Ok(Value::Null),
            other => decode(inner, other, at),
        },
        TypeModel::Sequence { elem, .. } => match json {
            Json::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| decode(elem, item, &at.index(i)))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Sequence),
            other => Err(at.shape_error("array", kind_of(other))),
        },
        TypeModel::Mapping { value, .. } => match json {
            Json::Object(map) => map
                .iter()
                .map(|(k, v)| Ok((k.clone(), decode(value, v, &at.child(k))?)))
                .collect::<Result<Vec<_>, MarshalError>>()
                .map(Value::Mapping),
            other => Err(at.shape_error("object", kind_of(other))),
        },
        TypeModel::Composite(c) => {
            let at = at.within(c.type_name);
            let map = match json {
                Json::Object(map) => map,
                other => return Err(at.shape_error("object", kind_of(other))),
            };
            let mut values = Vec::with_capacity(c.fields.len());
            for field in c.visible_fields() {
                let wire = field.wire_name();
                let here = at.child(wire);
                let value = match map.get(wire) {
                    None | Some(Json::Null) if field.model.is_optional() => Value::Null,
                    None | Some(Json::Null) => return Err(here.missing(wire)),
                    Some(v) => decode(&field.model, v, &here)?,
                };
                values.push((field.name, value));
            }
            Ok(Value::Composite(values))
        }
    }
}

fn scalar(kind: ScalarKind, json: &Json, at: &Location) -> Result<Value, MarshalError> {
    match (kind, json) {
        (ScalarKind::String, Json::String(s)) => Ok(Value::String(s.clone())),
        (ScalarKind::Boolean, Json::Bool(b)) => Ok(Value::Boolean(*b)),
        (ScalarKind::Integer, Json::Number(n)) => {
            if let Some(i) = n.as_i64() {
                return Ok(Value::Integer(i));
            }
            match n.as_f64() {
                // 3.0 is integral; 3.5 and values past i64 are not.
                Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
                    Ok(Value::Integer(f as i64))
                }
                _ => Err(at.type_error("integer", n.to_string())),
            }
        }
        (ScalarKind::Float, Json::Number(n)) => n
            .as_f64()
            .map(Value::Float)
            .ok_or_else(|| at.type_error("float", n.to_string())),
        (ScalarKind::BigNumber, Json::Number(n)) => Ok(Value::BigNumber(n.clone())),
        (ScalarKind::Binary, Json::String(s)) => base64::engine::general_purpose::STANDARD
            .decode(s)
            .map(Value::Binary)
            .map_err(|e| at.type_error("base64 string", e.to_string())),
        (kind, other) => Err(at.type_error(kind.as_str(), kind_of(other))),
    }
}
