use serde_json::Value;

const IDENTIFIER_FIELDS: [&str; 5] = ["path", "id", "fileId", "file", "name"];

/// Read-only view over a backend record that may carry its fields directly
/// or under a `data` wrapper.
#[derive(Debug, Clone, Copy)]
pub struct RecordView<'a> {
    record: &'a Value,
    data: Option<&'a Value>,
}

impl<'a> RecordView<'a> {
    pub fn new(record: &'a Value) -> Self {
        Self {
            record,
            data: record.get("data").filter(|data| data.is_object()),
        }
    }

    pub fn raw(&self) -> &'a Value {
        self.record
    }

    /// The wrapped payload when there is one, else the record itself.
    pub fn payload(&self) -> &'a Value {
        self.data.unwrap_or(self.record)
    }

    pub fn key(&self) -> Option<String> {
        reviewtree_core::record_key(self.record)
    }

    /// First non-empty scalar under `field`, record before `data`.
    pub fn field(&self, field: &str) -> Option<String> {
        self.layers().find_map(|layer| scalar(layer.get(field)?))
    }

    /// Identifier used to line the record up with a tree path: the first
    /// path-like candidate, otherwise the first non-empty one.
    pub fn preferred_identifier(&self) -> Option<String> {
        let candidates: Vec<String> = self
            .layers()
            .flat_map(|layer| {
                IDENTIFIER_FIELDS
                    .iter()
                    .filter_map(move |field| scalar(layer.get(field)?))
            })
            .collect();
        candidates
            .iter()
            .find(|candidate| candidate.contains('/'))
            .or_else(|| candidates.first())
            .cloned()
    }

    fn layers(&self) -> impl Iterator<Item = &'a Value> {
        std::iter::once(self.record).chain(self.data)
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
