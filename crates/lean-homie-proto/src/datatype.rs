//! Property datatypes and their canonical defaults.

use serde::{Deserialize, Serialize};

/// Declared kind of a property value, published on `$datatype`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Free text.
    String,
    /// `true` or `false`.
    Boolean,
    /// Three comma separated components, e.g. `120,100,80`.
    Color,
    /// One tag out of the `$format` tag list.
    Enum,
    /// Floating point number.
    Float,
    /// Integer number.
    Integer,
}

impl DataType {
    /// The `$datatype` payload.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Color => "color",
            Self::Enum => "enum",
            Self::Float => "float",
            Self::Integer => "integer",
        }
    }

    /// Value substituted when a payload is empty or fails validation.
    #[must_use]
    pub fn default_value(self) -> &'static str {
        match self {
            Self::String => "",
            Self::Boolean => "false",
            Self::Color => "0,0,0",
            Self::Enum => "default",
            Self::Float => "0.0",
            Self::Integer => "0",
        }
    }

    /// Initial capacity of a value buffer of this kind.
    #[must_use]
    pub fn initial_capacity(self) -> usize {
        match self {
            Self::String => 201,
            Self::Boolean => 6,
            Self::Color => 12,
            Self::Enum => 4,
            Self::Float | Self::Integer => 20,
        }
    }

    /// Parse a `$datatype` payload.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "string" => Some(Self::String),
            "boolean" => Some(Self::Boolean),
            "color" => Some(Self::Color),
            "enum" => Some(Self::Enum),
            "float" => Some(Self::Float),
            "integer" => Some(Self::Integer),
            _ => None,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_match_serde() {
        let parsed: DataType = serde_json::from_str("\"integer\"").unwrap();
        assert_eq!(parsed, DataType::Integer);
        assert_eq!(DataType::from_name(parsed.as_str()), Some(parsed));
        assert_eq!(DataType::from_name("double"), None);
    }

    #[test]
    fn defaults() {
        assert_eq!(DataType::Boolean.default_value(), "false");
        assert_eq!(DataType::Color.default_value(), "0,0,0");
        assert_eq!(DataType::Float.default_value(), "0.0");
    }
}
