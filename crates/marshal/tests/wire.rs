use std::collections::{BTreeMap, HashMap};

use kope_core::{describe, Bytes, Metadata, Scope, SchemaError};
use kope_marshal::{marshal, to_wire, unmarshal, MarshalError};
use serde_json::json;

describe! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct Port {
        pub name: String,
        #[field(wire = "containerPort")]
        pub number: i32,
    }
}

describe! {
    #[resource(kind = "Service", group = "example.com", version = "v1")]
    #[derive(Debug, Clone, PartialEq)]
    pub struct Service {
        pub metadata: Metadata,
        pub image: String,
        pub replicas: Option<i32>,
        pub ratio: f64,
        pub enabled: bool,
        pub ports: Vec<Port>,
        pub labels: BTreeMap<String, String>,
        pub payload: Bytes,
        pub slots: Vec<Option<String>>,
        pub limits: HashMap<String, Option<i64>>,
        pub checksum: u64,
        #[field(ignore)]
        pub cache: Vec<String>,
    }
}

describe! {
    #[resource(kind = "Gauge", group = "example.com", version = "v1alpha1", scope = Scope::Cluster)]
    #[derive(Debug, Clone, PartialEq)]
    pub struct Gauge {
        pub metadata: Metadata,
        pub level: i8,
    }
}

describe! {
    #[derive(Debug, Clone, PartialEq)]
    pub struct Plain {
        pub value: String,
    }
}

fn sample() -> Service {
    let mut limits = HashMap::new();
    limits.insert("cpu".to_string(), Some(2));
    limits.insert("gpu".to_string(), None);
    Service {
        metadata: Metadata::named("web").with_namespace("prod").with_label("app", "web"),
        image: "nginx:1.25".into(),
        replicas: None,
        ratio: 0.5,
        enabled: true,
        ports: vec![Port { name: "http".into(), number: 80 }],
        labels: BTreeMap::from([("tier".to_string(), "front".to_string())]),
        payload: Bytes(b"hello".to_vec()),
        slots: vec![Some("a".into()), None, Some("c".into())],
        limits,
        checksum: u64::MAX,
        cache: vec!["scratch".into()],
    }
}

#[test]
fn marshals_resource_documents() {
    let doc = marshal(&sample()).expect("marshal");
    assert_eq!(
        doc,
        json!({
            "apiVersion": "example.com/v1",
            "kind": "Service",
            "metadata": {
                "name": "web",
                "namespace": "prod",
                "labels": { "app": "web" }
            },
            "image": "nginx:1.25",
            "ratio": 0.5,
            "enabled": true,
            "ports": [{ "name": "http", "containerPort": 80 }],
            "labels": { "tier": "front" },
            "payload": "aGVsbG8=",
            "slots": ["a", null, "c"],
            "limits": { "cpu": 2, "gpu": null },
            "checksum": 18446744073709551615u64
        })
    );
}

#[test]
fn none_fields_are_omitted_not_null() {
    let doc = marshal(&sample()).expect("marshal");
    assert!(doc.get("replicas").is_none());
    assert!(doc["metadata"].get("uid").is_none());
    assert!(doc.get("cache").is_none());
}

#[test]
fn unmarshal_restores_the_instance() {
    let original = sample();
    let doc = marshal(&original).expect("marshal");
    let back: Service = unmarshal(&doc).expect("unmarshal");
    assert_eq!(back, Service { cache: Vec::new(), ..original });
}

#[test]
fn none_map_values_keep_their_keys() {
    let mut quota = sample();
    quota.limits = HashMap::from([("cpu".to_string(), Some(2)), ("gpu".to_string(), None)]);
    quota.cache = Vec::new();
    let doc = marshal(&quota).expect("marshal");
    assert_eq!(doc["limits"], json!({ "cpu": 2, "gpu": null }));
    let back: Service = unmarshal(&doc).expect("unmarshal");
    assert_eq!(back.limits.get("gpu"), Some(&None));
    assert_eq!(back, quota);
}

#[test]
fn unknown_keys_and_server_metadata_are_tolerated() {
    let doc = json!({
        "apiVersion": "example.com/v1alpha1",
        "kind": "Gauge",
        "metadata": {
            "name": "g1",
            "resourceVersion": "42",
            "uid": "abc",
            "creationTimestamp": "2024-01-01T00:00:00Z",
            "managedFields": []
        },
        "level": 3,
        "status": { "observed": true }
    });
    let gauge: Gauge = unmarshal(&doc).expect("unmarshal");
    assert_eq!(gauge.level, 3);
    assert_eq!(gauge.metadata.name, "g1");
    assert_eq!(gauge.metadata.resource_version.as_deref(), Some("42"));
    assert_eq!(gauge.metadata.uid.as_deref(), Some("abc"));
}

#[test]
fn missing_required_field_names_field_and_path() {
    let doc = json!({ "metadata": { "name": "g1" } });
    let err = unmarshal::<Gauge>(&doc).unwrap_err();
    assert_eq!(
        err,
        MarshalError::MissingField { type_name: "Gauge".into(), path: "/level".into(), field: "level".into() }
    );

    let doc = json!({ "metadata": { "name": "g1" }, "level": null });
    assert!(matches!(unmarshal::<Gauge>(&doc).unwrap_err(), MarshalError::MissingField { .. }));
}

#[test]
fn nested_missing_field_reports_nested_type() {
    let mut doc = marshal(&sample()).expect("marshal");
    doc["ports"][0].as_object_mut().expect("port object").remove("containerPort");
    match unmarshal::<Service>(&doc).unwrap_err() {
        MarshalError::MissingField { type_name, path, field } => {
            assert_eq!(type_name, "Port");
            assert_eq!(path, "/ports/0/containerPort");
            assert_eq!(field, "containerPort");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn scalar_mismatches_are_type_errors() {
    let doc = json!({ "metadata": { "name": "g1" }, "level": "three" });
    match unmarshal::<Gauge>(&doc).unwrap_err() {
        MarshalError::Type { path, expected, found, .. } => {
            assert_eq!(path, "/level");
            assert_eq!(expected, "integer");
            assert_eq!(found, "string");
        }
        other => panic!("unexpected {:?}", other),
    }

    let doc = json!({ "metadata": { "name": "g1" }, "level": 1.5 });
    assert!(matches!(unmarshal::<Gauge>(&doc).unwrap_err(), MarshalError::Type { .. }));
}

#[test]
fn integral_floats_are_accepted_for_integers() {
    let doc = json!({ "metadata": { "name": "g1" }, "level": 4.0 });
    assert_eq!(unmarshal::<Gauge>(&doc).expect("unmarshal").level, 4);
}

#[test]
fn out_of_range_integers_are_type_errors() {
    let doc = json!({ "metadata": { "name": "g1" }, "level": 300 });
    let err = unmarshal::<Gauge>(&doc).unwrap_err();
    match &err {
        MarshalError::Type { path, found, .. } => {
            assert_eq!(path, "/level");
            assert_eq!(found, "300");
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(err.to_string().contains("i8"), "{}", err);
}

#[test]
fn non_array_where_array_expected_is_shape_mismatch() {
    let mut doc = marshal(&sample()).expect("marshal");
    doc["ports"] = json!({ "name": "http" });
    match unmarshal::<Service>(&doc).unwrap_err() {
        MarshalError::ShapeMismatch { path, expected, found, .. } => {
            assert_eq!(path, "/ports");
            assert_eq!(expected, "array");
            assert_eq!(found, "object");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn invalid_base64_is_a_type_error() {
    let mut doc = marshal(&sample()).expect("marshal");
    doc["payload"] = json!("not base64!");
    assert!(matches!(unmarshal::<Service>(&doc).unwrap_err(), MarshalError::Type { .. }));
}

#[test]
fn non_finite_floats_do_not_marshal() {
    let mut svc = sample();
    svc.ratio = f64::NAN;
    match marshal(&svc).unwrap_err() {
        MarshalError::Type { path, expected, .. } => {
            assert_eq!(path, "/ratio");
            assert_eq!(expected, "finite float");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn marshal_requires_identity() {
    let err = marshal(&Plain { value: "x".into() }).unwrap_err();
    assert!(matches!(err, MarshalError::Schema(SchemaError::MissingIdentity { .. })), "{:?}", err);
    assert_eq!(to_wire(&Plain { value: "x".into() }).expect("to_wire"), json!({ "value": "x" }));
}

#[test]
fn keys_are_sorted() {
    let doc = marshal(&sample()).expect("marshal");
    let keys: Vec<_> = doc.as_object().expect("object").keys().cloned().collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
}
