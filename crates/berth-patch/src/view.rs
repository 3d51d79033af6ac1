//! Mutable views over the JSON document tree

use serde_json::{Map, Value};

/// Mutable access to one pod spec inside a document
pub struct PodSpecMut<'a> {
    spec: &'a mut Value,
}

impl<'a> PodSpecMut<'a> {
    /// Wrap a pod spec value
    pub fn new(spec: &'a mut Value) -> Self {
        Self { spec }
    }

    /// Containers and init containers
    pub fn containers(&mut self) -> impl Iterator<Item = &mut Value> {
        berth_manifest::pod::containers_mut(self.spec)
    }

    /// Pod volumes
    pub fn volumes(&self) -> &[Value] {
        self.spec
            .get("volumes")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// The pod spec as a map, replacing a non-map value
    pub fn fields(&mut self) -> &mut Map<String, Value> {
        as_object(self.spec)
    }
}

/// Coerce a value into a map in place and return it
pub fn as_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}

/// Child map under `key`, created (or replaced if not a map) as needed
pub fn child<'m>(map: &'m mut Map<String, Value>, key: &str) -> &'m mut Map<String, Value> {
    as_object(
        map.entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new())),
    )
}

/// Map at a JSON pointer, creating only the final segment.
///
/// Returns `None` when the parent does not exist, so callers never grow
/// structure that the document did not already have.
pub fn object_at<'d>(doc: &'d mut Value, pointer: &str) -> Option<&'d mut Map<String, Value>> {
    let (parent, last) = pointer.rsplit_once('/')?;
    let parent = if parent.is_empty() {
        Some(doc)
    } else {
        doc.pointer_mut(parent)
    }?;
    let parent = parent.as_object_mut()?;
    Some(child(parent, last))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_at_creates_only_the_last_segment() {
        let mut doc = json!({"spec": {"template": {"spec": {}}}});
        assert!(object_at(&mut doc, "/spec/template/metadata").is_some());
        assert_eq!(doc["spec"]["template"]["metadata"], json!({}));
        assert!(object_at(&mut doc, "/spec/jobTemplate/metadata").is_none());
        assert!(object_at(&mut doc, "/metadata").is_some());
    }

    #[test]
    fn child_replaces_non_objects() {
        let mut map = Map::new();
        map.insert("labels".into(), json!("oops"));
        child(&mut map, "labels").insert("a".into(), json!("b"));
        assert_eq!(map["labels"], json!({"a": "b"}));
    }

    #[test]
    fn pod_view_exposes_volumes() {
        let mut spec = json!({"volumes": [{"name": "data"}], "containers": [{"name": "c"}]});
        let mut pod = PodSpecMut::new(&mut spec);
        assert_eq!(pod.volumes().len(), 1);
        assert_eq!(pod.containers().count(), 1);
    }
}
