use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::delegates::DelegateResponse;
use crate::error::{BadInputCode, MipError};

/// A parsed JSON document
#[derive(Debug, Clone, PartialEq)]
pub struct JsonDocument {
    root: Value,
}

impl JsonDocument {
    pub fn new(root: Value) -> Self {
        Self { root }
    }

    pub fn object() -> Self {
        Self::new(Value::Object(Map::new()))
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn into_value(self) -> Value {
        self.root
    }

    /// Member of the root object
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.root.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.root.get(key).and_then(Value::as_str)
    }

    /// Set a member on the root object; fails if the root is not an object
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> DelegateResponse<()> {
        match &mut self.root {
            Value::Object(map) => {
                map.insert(key.into(), value);
                Ok(())
            }
            _ => Err(MipError::bad_input("JSON document root is not an object")),
        }
    }

    /// Deserialize into a typed value
    pub fn to_typed<T: DeserializeOwned>(&self) -> DelegateResponse<T> {
        serde_json::from_value(self.root.clone()).map_err(|e| {
            MipError::bad_input_with_code(
                format!("JSON document has unexpected shape: {}", e),
                BadInputCode::ParameterParsing,
            )
        })
    }

    pub fn serialize(&self) -> String {
        self.root.to_string()
    }
}

/// JSON parsing seam
pub trait JsonDelegate: Send + Sync {
    fn create_json_object_document(&self) -> DelegateResponse<JsonDocument>;

    fn parse(&self, value: &str) -> DelegateResponse<JsonDocument>;
}

/// Default delegate built on `serde_json`
#[derive(Debug, Default, Clone, Copy)]
pub struct SerdeJsonDelegate;

impl JsonDelegate for SerdeJsonDelegate {
    fn create_json_object_document(&self) -> DelegateResponse<JsonDocument> {
        Ok(JsonDocument::object())
    }

    fn parse(&self, value: &str) -> DelegateResponse<JsonDocument> {
        let root = serde_json::from_str(value).map_err(|e| {
            MipError::bad_input_with_code(
                format!("Invalid JSON: {}", e),
                BadInputCode::ParameterParsing,
            )
        })?;
        Ok(JsonDocument::new(root))
    }
}
