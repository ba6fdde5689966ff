//! Mapping between directory user attributes and repository profile fields.

mod telephone;
mod text;
mod updater;

pub use telephone::TelephoneConverter;
pub use text::TextConverter;
pub use updater::ProfileUpdater;

use crate::config::{FieldKind, ProfileConfig};
use crate::types::{AttributeBag, ProfileFields};

/// Converts one directory attribute to one profile field and back.
///
/// Conversions never fail: a value that cannot be converted is logged and
/// left out of the output.
pub trait FieldConverter: Send + Sync {
    /// Directory attribute this converter reads and writes.
    fn attribute(&self) -> &str;

    /// Repository profile field this converter reads and writes.
    fn field(&self) -> &str;

    fn encode(&self, attributes: &AttributeBag, fields: &mut ProfileFields);

    fn decode(&self, fields: &ProfileFields, attributes: &mut AttributeBag);
}

/// The configured set of converters, applied in order.
#[derive(Default)]
pub struct ProfileSchema {
    converters: Vec<Box<dyn FieldConverter>>,
}

impl ProfileSchema {
    pub fn new(converters: Vec<Box<dyn FieldConverter>>) -> Self {
        Self { converters }
    }

    pub fn from_config(config: &ProfileConfig) -> Self {
        let converters = config
            .fields
            .iter()
            .map(|f| -> Box<dyn FieldConverter> {
                match f.kind {
                    FieldKind::Text => {
                        Box::new(TextConverter::new(&f.attribute, &f.field, f.multiple))
                    }
                    FieldKind::Telephone => {
                        Box::new(TelephoneConverter::new(&f.attribute, &f.field, f.multiple))
                    }
                }
            })
            .collect();
        Self { converters }
    }

    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }

    /// Directory attributes the schema reads.
    pub fn attributes(&self) -> impl Iterator<Item = &str> {
        self.converters.iter().map(|c| c.attribute())
    }

    pub fn encode(&self, attributes: &AttributeBag) -> ProfileFields {
        let mut fields = ProfileFields::new();
        for converter in &self.converters {
            converter.encode(attributes, &mut fields);
        }
        fields
    }

    pub fn decode(&self, fields: &ProfileFields) -> AttributeBag {
        let mut attributes = AttributeBag::new();
        for converter in &self.converters {
            converter.decode(fields, &mut attributes);
        }
        attributes
    }
}

/// Longest text value the repository stores.
pub(crate) const MAX_TEXT_LEN: usize = 1995;

pub(crate) fn truncate(value: &str) -> String {
    match value.char_indices().nth(MAX_TEXT_LEN) {
        Some((cut, _)) => value[..cut].to_string(),
        None => value.to_string(),
    }
}
