// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use serde_json::{Map, Value};
use std::fmt::{Display, Formatter};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandFormatError {
    #[error("message is not a JSON object")]
    NotAnObject,
    #[error("message has no \"cmd\" field")]
    MissingName,
    #[error("missing field {0:?}")]
    MissingField(String),
    #[error("field {field:?} should be {expected}")]
    WrongFieldType {
        field: String,
        expected: &'static str,
    },
}

/// A tagged record `{cmd: name, ...fields}`. This is the unit of exchange in both directions:
/// hosts send them to the engine as commands, and the engine sends them back as replies,
/// messages and notices.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    name: String,
    fields: Map<String, Value>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Map::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }

    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.fields.insert(field.to_string(), value.into());
    }

    /// `{cmd: "message", text}`: player-visible text.
    pub fn message(text: impl Into<String>) -> Self {
        Command::new("message").with("text", text.into())
    }

    /// `{cmd: "error", text}`: player-visible error text.
    pub fn error(text: impl Into<String>) -> Self {
        Command::new("error").with("text", text.into())
    }

    pub fn from_object(mut object: Map<String, Value>) -> Result<Self, CommandFormatError> {
        let name = match object.remove("cmd") {
            Some(Value::String(name)) => name,
            Some(_) => {
                return Err(CommandFormatError::WrongFieldType {
                    field: "cmd".to_string(),
                    expected: "a string",
                });
            }
            None => return Err(CommandFormatError::MissingName),
        };
        Ok(Self {
            name,
            fields: object,
        })
    }

    pub fn from_value(value: Value) -> Result<Self, CommandFormatError> {
        match value {
            Value::Object(object) => Self::from_object(object),
            _ => Err(CommandFormatError::NotAnObject),
        }
    }

    pub fn to_object(&self) -> Map<String, Value> {
        let mut object = self.fields.clone();
        object.insert("cmd".to_string(), Value::String(self.name.clone()));
        object
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    pub fn get_u64(&self, field: &str) -> Option<u64> {
        self.fields.get(field).and_then(Value::as_u64)
    }

    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.fields.get(field).and_then(Value::as_bool)
    }

    pub fn require(&self, field: &str) -> Result<&Value, CommandFormatError> {
        self.fields
            .get(field)
            .ok_or_else(|| CommandFormatError::MissingField(field.to_string()))
    }

    pub fn require_str(&self, field: &str) -> Result<&str, CommandFormatError> {
        self.require(field)?
            .as_str()
            .ok_or_else(|| CommandFormatError::WrongFieldType {
                field: field.to_string(),
                expected: "a string",
            })
    }

    pub fn require_u64(&self, field: &str) -> Result<u64, CommandFormatError> {
        self.require(field)?
            .as_u64()
            .ok_or_else(|| CommandFormatError::WrongFieldType {
                field: field.to_string(),
                expected: "an unsigned integer",
            })
    }

    pub fn require_array(&self, field: &str) -> Result<&Vec<Value>, CommandFormatError> {
        self.require(field)?
            .as_array()
            .ok_or_else(|| CommandFormatError::WrongFieldType {
                field: field.to_string(),
                expected: "an array",
            })
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", Value::Object(self.to_object()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn object_conversion_keeps_fields() {
        let value = json!({"cmd": "playeropen", "uid": 12, "email": "a@b.c"});
        let command = Command::from_value(value.clone()).unwrap();
        assert_eq!(command.name(), "playeropen");
        assert_eq!(command.get_u64("uid"), Some(12));
        assert_eq!(command.get_str("email"), Some("a@b.c"));
        assert!(command.get("cmd").is_none());
        assert_eq!(Value::Object(command.to_object()), value);
    }

    #[test]
    fn rejects_malformed_records() {
        assert_eq!(
            Command::from_value(json!([1, 2])),
            Err(CommandFormatError::NotAnObject)
        );
        assert_eq!(
            Command::from_value(json!({"uid": 1})),
            Err(CommandFormatError::MissingName)
        );
        assert!(matches!(
            Command::from_value(json!({"cmd": 3})),
            Err(CommandFormatError::WrongFieldType { .. })
        ));
    }

    #[test]
    fn required_fields_report_what_is_wrong() {
        let command = Command::new("getprop").with("id1", "seven");
        assert_eq!(
            command.require_u64("id1"),
            Err(CommandFormatError::WrongFieldType {
                field: "id1".to_string(),
                expected: "an unsigned integer",
            })
        );
        assert_eq!(
            command.require_str("name"),
            Err(CommandFormatError::MissingField("name".to_string()))
        );
    }

    #[test]
    fn player_text_records() {
        assert_eq!(
            Value::Object(Command::error("nope").to_object()),
            json!({"cmd": "error", "text": "nope"})
        );
        assert_eq!(
            Value::Object(Command::message("hi").to_object()),
            json!({"cmd": "message", "text": "hi"})
        );
    }
}
