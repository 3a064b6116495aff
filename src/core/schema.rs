// Type descriptors: a derived JSON Schema plus a canonical example per item type.
use super::codec::base64_bytes;
use crate::core::error::{Error, ErrorKind};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

const DRAFT_07: &str = "http://json-schema.org/draft-07/schema#";

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
    #[serde(with = "base64_bytes")]
    pub schema: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub proto: Vec<u8>,
}

impl TypeDescriptor {
    /// Derives the schema from `T` and records `example`'s values as the prototype.
    pub fn from_example<T>(key: &str, example: &T) -> Result<Self, Error>
    where
        T: JsonSchema + Serialize,
    {
        ensure_type_key(key)?;
        let schema = schemars::schema_for!(T);
        let schema = serde_json::to_vec(&schema).map_err(|err| schema_error(key, err))?;
        let proto = serde_json::to_vec(example).map_err(|err| schema_error(key, err))?;
        Ok(Self {
            key: key.to_string(),
            schema,
            proto,
        })
    }

    /// Describes an untyped JSON example by the shape of the value itself.
    pub fn from_json_example(key: &str, example: &Value) -> Result<Self, Error> {
        ensure_type_key(key)?;
        let mut schema = Map::new();
        schema.insert("$schema".to_string(), json!(DRAFT_07));
        schema.insert("title".to_string(), json!(key));
        if let Value::Object(shape) = shape_of(example) {
            schema.extend(shape);
        }
        let schema =
            serde_json::to_vec(&Value::Object(schema)).map_err(|err| schema_error(key, err))?;
        let proto = serde_json::to_vec(example).map_err(|err| schema_error(key, err))?;
        Ok(Self {
            key: key.to_string(),
            schema,
            proto,
        })
    }

    pub fn schema_json(&self) -> Result<Value, Error> {
        serde_json::from_slice(&self.schema).map_err(|err| {
            Error::new(ErrorKind::Decode)
                .with_message("invalid type schema json")
                .with_key(self.key.clone())
                .with_source(err)
        })
    }
}

fn ensure_type_key(key: &str) -> Result<(), Error> {
    if key.is_empty() {
        return Err(Error::new(ErrorKind::Usage).with_message("a type key is required"));
    }
    Ok(())
}

fn schema_error(key: &str, err: serde_json::Error) -> Error {
    Error::new(ErrorKind::Schema)
        .with_message("cannot describe item type")
        .with_key(key)
        .with_source(err)
}

fn shape_of(value: &Value) -> Value {
    match value {
        Value::Null => json!({"type": "null"}),
        Value::Bool(_) => json!({"type": "boolean"}),
        Value::Number(number) if number.is_f64() => json!({"type": "number"}),
        Value::Number(_) => json!({"type": "integer"}),
        Value::String(_) => json!({"type": "string"}),
        Value::Array(items) => match items.first() {
            Some(first) => json!({"type": "array", "items": shape_of(first)}),
            None => json!({"type": "array"}),
        },
        Value::Object(fields) => {
            let properties: Map<String, Value> = fields
                .iter()
                .map(|(name, field)| (name.clone(), shape_of(field)))
                .collect();
            let required: Vec<&String> = fields.keys().collect();
            json!({
                "type": "object",
                "properties": properties,
                "required": required,
            })
        }
    }
}
