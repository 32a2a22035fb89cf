//! Conversions between [`Value`] and `serde_json::Value`.
//!
//! JSON objects become records, arrays become sequences and `null` becomes
//! `Undefined`. The reverse direction produces a deep snapshot; containers
//! already on the current path (cycles) snapshot as `null`.

use std::collections::HashSet;

use serde_json::{Map as JsonMap, Number, Value as Json};

use super::{Container, ContainerData, ContainerId, EntryKey, Value};

impl From<Json> for Value {
    fn from(json: Json) -> Self {
        match json {
            Json::Null => Value::Undefined,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::Str(s.into()),
            Json::Array(items) => Value::sequence(items.into_iter().map(Value::from)),
            Json::Object(fields) => {
                Value::record(fields.into_iter().map(|(k, v)| (k, Value::from(v))))
            }
        }
    }
}

impl Value {
    /// Deep snapshot of this value as JSON.
    pub fn to_json(&self) -> Json {
        snapshot(self, &mut HashSet::new())
    }
}

impl Container {
    /// Deep snapshot of this container as JSON.
    pub fn to_json(&self) -> Json {
        snapshot_container(self, &mut HashSet::new())
    }
}

fn snapshot(value: &Value, visiting: &mut HashSet<ContainerId>) -> Json {
    match value {
        Value::Undefined => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::Number((*i).into()),
        Value::Float(f) => Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
        Value::Str(s) => Json::String(s.to_string()),
        Value::Container(c) => snapshot_container(c, visiting),
    }
}

fn snapshot_container(container: &Container, visiting: &mut HashSet<ContainerId>) -> Json {
    if !visiting.insert(container.id()) {
        return Json::Null;
    }
    let json = match &*container.data() {
        ContainerData::Record(record) => Json::Object(
            record
                .0
                .iter()
                .map(|(k, v)| (k.to_string(), snapshot(v, visiting)))
                .collect(),
        ),
        ContainerData::Sequence(seq) => {
            Json::Array(seq.0.iter().map(|v| snapshot(v, visiting)).collect())
        }
        ContainerData::Map(map) => {
            let mut object = JsonMap::with_capacity(map.0.len());
            for (k, v) in &map.0 {
                object.insert(entry_key_string(k), snapshot(v, visiting));
            }
            Json::Object(object)
        }
        ContainerData::Set(set) => Json::Array(set.0.iter().map(entry_key_json).collect()),
    };
    visiting.remove(&container.id());
    json
}

fn entry_key_string(key: &EntryKey) -> String {
    match key {
        EntryKey::Bool(b) => b.to_string(),
        EntryKey::Int(i) => i.to_string(),
        EntryKey::Str(s) => s.to_string(),
    }
}

fn entry_key_json(key: &EntryKey) -> Json {
    match key {
        EntryKey::Bool(b) => Json::Bool(*b),
        EntryKey::Int(i) => Json::Number((*i).into()),
        EntryKey::Str(s) => Json::String(s.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Key;
    use serde_json::json;

    #[test]
    fn json_objects_become_records() {
        let value = Value::from(json!({ "a": 1, "b": [true, null, 2.5], "c": "x" }));
        let container = value.as_container().unwrap();
        assert_eq!(container.read(&Key::field("a")).unwrap(), Some(Value::Int(1)));
        assert_eq!(container.to_json(), json!({ "a": 1, "b": [true, null, 2.5], "c": "x" }));
    }

    #[test]
    fn maps_and_sets_snapshot_with_string_keys() {
        let map = Value::map([(1, "one"), (2, "two")]);
        assert_eq!(map.to_json(), json!({ "1": "one", "2": "two" }));
        let set = Value::set(["a", "b"]);
        assert_eq!(set.to_json(), json!(["a", "b"]));
    }

    #[test]
    fn cycles_snapshot_as_null() {
        let outer = Container::record::<&str, i64>([]);
        outer
            .data_mut()
            .as_interceptable_mut()
            .write(&Key::field("me"), Value::Container(outer.clone()))
            .unwrap();
        assert_eq!(outer.to_json(), json!({ "me": null }));
        // break the cycle so the test does not leak
        outer.data_mut().as_interceptable_mut().delete(&Key::field("me")).unwrap();
    }
}
