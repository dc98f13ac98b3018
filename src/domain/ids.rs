//! Domain identifier types with validation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Managed table identifier
///
/// Used as the checkpoint key and as a path segment of staged objects, so it is
/// restricted to ASCII letters, digits, `_`, `-` and `.`.
///
/// # Examples
///
/// ```
/// use sluice::domain::ids::TableName;
/// use std::str::FromStr;
///
/// let table = TableName::from_str("HistoryMainline").unwrap();
/// assert_eq!(table.as_str(), "HistoryMainline");
/// assert!(TableName::from_str("orders/2024").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableName(String);

impl TableName {
    /// Creates a new TableName from a string
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty, longer than 128 characters or
    /// contains characters outside `[A-Za-z0-9_.-]`.
    pub fn new(name: impl Into<String>) -> Result<Self, String> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err("Table name cannot be empty".to_string());
        }
        if name.chars().all(|c| c == '.') {
            return Err(format!("Table name '{name}' is not a valid identifier"));
        }
        if name.len() > 128 {
            return Err(format!("Table name '{name}' exceeds 128 characters"));
        }
        if let Some(bad) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
        {
            return Err(format!(
                "Table name '{name}' contains invalid character '{bad}'"
            ));
        }
        Ok(Self(name))
    }

    /// Returns the table name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TableName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for TableName {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TableName> for String {
    fn from(value: TableName) -> Self {
        value.0
    }
}

impl AsRef<str> for TableName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_valid() {
        let name = TableName::new("dim_customer.v2").unwrap();
        assert_eq!(name.as_str(), "dim_customer.v2");
        assert_eq!(name.to_string(), "dim_customer.v2");
    }

    #[test]
    fn test_table_name_rejects_empty() {
        assert!(TableName::new("").is_err());
        assert!(TableName::new("   ").is_err());
    }

    #[test]
    fn test_table_name_rejects_path_characters() {
        assert!(TableName::new("a/b").is_err());
        assert!(TableName::new("a b").is_err());
        assert!(TableName::new("../etc").is_err());
        assert!(TableName::new("..").is_err());
    }

    #[test]
    fn test_table_name_rejects_long_names() {
        assert!(TableName::new("x".repeat(129)).is_err());
        assert!(TableName::new("x".repeat(128)).is_ok());
    }

    #[test]
    fn test_table_name_serde_validates() {
        let ok: TableName = serde_json::from_str("\"orders\"").unwrap();
        assert_eq!(ok.as_str(), "orders");
        assert!(serde_json::from_str::<TableName>("\"bad name\"").is_err());
    }
}
