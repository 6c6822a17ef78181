use std::collections::BTreeSet;

/// A document carrying a set of tags and an optional numeric value.
///
/// Tests usually define one filter per tag, matching the documents that carry it.
#[derive(Debug, Clone, PartialEq)]
pub struct TagDoc {
    pub id: u64,
    pub tags: BTreeSet<String>,
    pub value: Option<f64>,
}

impl TagDoc {
    pub fn new<S: AsRef<str>>(id: u64, tags: &[S]) -> TagDoc {
        TagDoc {
            id,
            tags: tags.iter().map(|t| t.as_ref().to_string()).collect(),
            value: None,
        }
    }

    pub fn with_value(mut self, value: f64) -> TagDoc {
        self.value = Some(value);
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        obj.insert("id".into(), self.id.into());
        for tag in &self.tags {
            obj.insert(tag.clone(), true.into());
        }
        if let Some(value) = self.value {
            obj.insert("value".into(), value.into());
        }
        serde_json::Value::Object(obj)
    }
}
