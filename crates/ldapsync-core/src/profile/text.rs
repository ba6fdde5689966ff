use super::{truncate, FieldConverter};
use crate::types::{AttributeBag, ProfileFields};
use serde_json::Value;
use tracing::error;

/// Plain string attribute mapped to a string field, or to an array of strings
/// when `multiple` is set.
#[derive(Debug, Clone)]
pub struct TextConverter {
    attribute: String,
    field: String,
    multiple: bool,
}

impl TextConverter {
    pub fn new(attribute: &str, field: &str, multiple: bool) -> Self {
        Self {
            attribute: attribute.to_string(),
            field: field.to_string(),
            multiple,
        }
    }
}

impl FieldConverter for TextConverter {
    fn attribute(&self) -> &str {
        &self.attribute
    }

    fn field(&self) -> &str {
        &self.field
    }

    fn encode(&self, attributes: &AttributeBag, fields: &mut ProfileFields) {
        let value = match attributes.get(&self.attribute) {
            None if self.multiple => Value::Array(Vec::new()),
            None => Value::String(String::new()),
            Some([]) => {
                error!(attribute = %self.attribute, "attribute has no values");
                return;
            }
            Some(values) if self.multiple => values
                .iter()
                .map(|v| Value::String(truncate(v)))
                .collect(),
            Some([single]) => Value::String(truncate(single)),
            Some(values) => {
                error!(
                    attribute = %self.attribute,
                    count = values.len(),
                    "single-valued attribute has several values"
                );
                return;
            }
        };
        fields.insert(self.field.clone(), value);
    }

    fn decode(&self, fields: &ProfileFields, attributes: &mut AttributeBag) {
        let values = match (fields.get(&self.field), self.multiple) {
            (Some(Value::String(s)), false) => vec![s.clone()],
            (Some(Value::Array(items)), true) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(s) => values.push(s.clone()),
                        other => {
                            error!(field = %self.field, value = %other, "expected a string");
                            return;
                        }
                    }
                }
                values
            }
            (Some(other), _) => {
                error!(field = %self.field, value = %other, "unexpected JSON type for field");
                return;
            }
            (None, _) => {
                error!(field = %self.field, "field missing from profile");
                return;
            }
        };
        let values = values.into_iter().filter(|v| !v.is_empty()).collect();
        attributes.insert(&self.attribute, values);
    }
}
