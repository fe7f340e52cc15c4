//! Permission policy document value types
//!
//! IAM policy JSON allows `Action` and `Resource` to appear as either a bare
//! string or an array of strings. [`StringOrList`] normalizes both wire forms
//! to an ordered list internally and re-emits the single-element form as a
//! bare string, matching the IAM API's own conventions so that round-tripped
//! documents compare equal structurally.

use std::fmt;

use schemars::gen::SchemaGenerator;
use schemars::schema::{
    ArrayValidation, InstanceType, Schema, SchemaObject, SubschemaValidation,
};
use schemars::JsonSchema;
use serde::de::{SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The pinned IAM policy language version
pub const DEFAULT_POLICY_VERSION: &str = "2012-10-17";

/// A JSON field that accepts either a bare string or an array of strings
///
/// Internally always an ordered list. Serialization is the exact inverse of
/// normalization: one element emits a bare string, more emit an array, and an
/// empty list emits JSON null (a quirk preserved for compatibility with
/// documents the IAM API already holds).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StringOrList(Vec<String>);

impl StringOrList {
    /// Create an empty list
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Normalize any mix of string-like values into the internal list form
    pub fn from_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(values.into_iter().map(Into::into).collect())
    }

    /// Iterate over the normalized entries
    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }

    /// The normalized entries as a slice
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// True if no entries are present
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<&str> for StringOrList {
    fn from(value: &str) -> Self {
        Self(vec![value.to_string()])
    }
}

impl From<Vec<String>> for StringOrList {
    fn from(values: Vec<String>) -> Self {
        Self(values)
    }
}

impl<'a> IntoIterator for &'a StringOrList {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Serialize for StringOrList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0.as_slice() {
            [] => serializer.serialize_none(),
            [single] => serializer.serialize_str(single),
            many => many.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for StringOrList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct StringOrListVisitor;

        impl<'de> Visitor<'de> for StringOrListVisitor {
            type Value = StringOrList;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string, a list of strings, or null")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(StringOrList(vec![v.to_string()]))
            }

            fn visit_string<E: serde::de::Error>(self, v: String) -> Result<Self::Value, E> {
                Ok(StringOrList(vec![v]))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut values = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(value) = seq.next_element::<String>()? {
                    values.push(value);
                }
                Ok(StringOrList(values))
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                Ok(StringOrList(Vec::new()))
            }

            fn visit_none<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                Ok(StringOrList(Vec::new()))
            }

            fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
                d.deserialize_any(self)
            }
        }

        deserializer.deserialize_any(StringOrListVisitor)
    }
}

impl JsonSchema for StringOrList {
    fn schema_name() -> String {
        "StringOrList".to_string()
    }

    fn json_schema(_gen: &mut SchemaGenerator) -> Schema {
        let string_form = Schema::Object(SchemaObject {
            instance_type: Some(InstanceType::String.into()),
            ..Default::default()
        });
        let list_form = Schema::Object(SchemaObject {
            instance_type: Some(InstanceType::Array.into()),
            array: Some(Box::new(ArrayValidation {
                items: Some(string_form.clone().into()),
                ..Default::default()
            })),
            ..Default::default()
        });
        Schema::Object(SchemaObject {
            subschemas: Some(Box::new(SubschemaValidation {
                any_of: Some(vec![string_form, list_form]),
                ..Default::default()
            })),
            ..Default::default()
        })
    }
}

/// Whether a statement grants or revokes the listed actions
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum Effect {
    /// Statement grants the listed actions
    Allow,
    /// Statement denies the listed actions
    Deny,
}

/// One permission policy statement
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    /// Optional statement identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,

    /// Allow or Deny
    pub effect: Effect,

    /// Actions covered by this statement (string or list on the wire)
    pub action: StringOrList,

    /// Resources covered by this statement (string or list on the wire)
    pub resource: StringOrList,
}

/// A tenant-declared permission policy document
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    /// Policy language version; defaulted to [`DEFAULT_POLICY_VERSION`] by
    /// the mutating webhook when absent
    #[serde(default)]
    pub version: String,

    /// Ordered statement list
    pub statement: Vec<Statement>,
}

impl PolicyDocument {
    /// Parse a policy document from its JSON wire form
    pub fn from_json(raw: &str) -> Result<Self, crate::Error> {
        serde_json::from_str(raw).map_err(|e| crate::Error::serialization(e.to_string()))
    }

    /// Serialize to the JSON wire form the IAM API expects
    pub fn to_json(&self) -> Result<String, crate::Error> {
        serde_json::to_string(self).map_err(|e| crate::Error::serialization(e.to_string()))
    }
}
