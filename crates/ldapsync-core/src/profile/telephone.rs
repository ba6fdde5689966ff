use super::FieldConverter;
use crate::types::{AttributeBag, ProfileFields};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;
use tracing::error;

/// A telephone number as stored in the profile. The directory form is
/// `network,number,extension`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Telephone {
    pub network: String,
    pub number: String,
    pub extension: String,
}

static NETWORK_RE: OnceLock<Regex> = OnceLock::new();
static NUMBER_RE: OnceLock<Regex> = OnceLock::new();
static EXTENSION_RE: OnceLock<Regex> = OnceLock::new();

fn network_re() -> &'static Regex {
    NETWORK_RE.get_or_init(|| Regex::new(r"^[A-Z0-9\- ]+$").expect("network pattern is valid"))
}

fn number_re() -> &'static Regex {
    NUMBER_RE.get_or_init(|| Regex::new(r"^[0-9 *()+#]+$").expect("number pattern is valid"))
}

fn extension_re() -> &'static Regex {
    EXTENSION_RE.get_or_init(|| Regex::new(r"^[0-9 *()+#]*$").expect("extension pattern is valid"))
}

impl Telephone {
    pub fn is_valid(&self) -> bool {
        network_re().is_match(&self.network)
            && number_re().is_match(&self.number)
            && extension_re().is_match(&self.extension)
    }

    fn is_blank(&self) -> bool {
        self.network.is_empty() && self.number.is_empty() && self.extension.is_empty()
    }

    /// Parse the directory form. Empty trailing parts are kept, so `"NET,1,"`
    /// has an empty extension.
    pub fn parse(value: &str) -> Option<Self> {
        let parts: Vec<&str> = value.split(',').collect();
        let [network, number, extension] = parts.as_slice() else {
            return None;
        };
        let phone = Telephone {
            network: network.to_string(),
            number: number.to_string(),
            extension: extension.to_string(),
        };
        phone.is_valid().then_some(phone)
    }

    pub fn to_attribute_value(&self) -> String {
        format!("{},{},{}", self.network, self.number, self.extension)
    }
}

/// Structured telephone attribute, single or multi-valued.
#[derive(Debug, Clone)]
pub struct TelephoneConverter {
    attribute: String,
    field: String,
    multiple: bool,
}

impl TelephoneConverter {
    pub fn new(attribute: &str, field: &str, multiple: bool) -> Self {
        Self {
            attribute: attribute.to_string(),
            field: field.to_string(),
            multiple,
        }
    }

    fn parse_logged(&self, value: &str) -> Option<Telephone> {
        let phone = Telephone::parse(value);
        if phone.is_none() {
            error!(attribute = %self.attribute, value, "invalid telephone value");
        }
        phone
    }

    fn from_json(&self, value: &Value) -> Option<Telephone> {
        match serde_json::from_value::<Telephone>(value.clone()) {
            Ok(phone) if phone.is_blank() => None,
            Ok(phone) if phone.is_valid() => Some(phone),
            Ok(phone) => {
                error!(field = %self.field, value = %phone.to_attribute_value(), "invalid telephone");
                None
            }
            Err(e) => {
                error!(field = %self.field, error = %e, "malformed telephone");
                None
            }
        }
    }
}

fn to_json(phone: &Telephone) -> Value {
    serde_json::json!({
        "network": phone.network,
        "number": phone.number,
        "extension": phone.extension,
    })
}

impl FieldConverter for TelephoneConverter {
    fn attribute(&self) -> &str {
        &self.attribute
    }

    fn field(&self) -> &str {
        &self.field
    }

    fn encode(&self, attributes: &AttributeBag, fields: &mut ProfileFields) {
        let value = match attributes.get(&self.attribute) {
            None if self.multiple => Value::Array(Vec::new()),
            None => to_json(&Telephone::default()),
            Some([]) => {
                error!(attribute = %self.attribute, "attribute has no values");
                return;
            }
            Some(values) if self.multiple => values
                .iter()
                .filter_map(|v| self.parse_logged(v))
                .map(|p| to_json(&p))
                .collect(),
            Some([single]) => match self.parse_logged(single) {
                Some(phone) => to_json(&phone),
                None => return,
            },
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
        let phones: Vec<Telephone> = match (fields.get(&self.field), self.multiple) {
            (Some(Value::Array(items)), true) => {
                items.iter().filter_map(|v| self.from_json(v)).collect()
            }
            (Some(obj @ Value::Object(_)), false) => self.from_json(obj).into_iter().collect(),
            (Some(other), _) => {
                error!(field = %self.field, value = %other, "unexpected JSON type for field");
                return;
            }
            (None, _) => {
                error!(field = %self.field, "field missing from profile");
                return;
            }
        };
        attributes.insert(
            &self.attribute,
            phones.iter().map(Telephone::to_attribute_value).collect(),
        );
    }
}
