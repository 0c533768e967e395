//! Declarative column schema shared by the scanner, the changeset builder and
//! the warehouse.
//!
//! The schema is a plain value: build it with [`TrackSchema::default`] or load
//! it from a YAML document, then hand it to whoever needs it.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::snapshot::record::{self, ValueKind};

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("IO error reading schema {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid schema YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Unknown column `{0}` in schema")]
    UnknownColumn(String),
    #[error("Column `{column}` is declared {declared} but holds {actual} values")]
    TypeMismatch {
        column: String,
        declared: ColumnType,
        actual: ValueKind,
    },
    #[error("Column `{0}` is listed more than once")]
    Duplicate(String),
}

/// Warehouse type of a column. Serialized in upper case (`STRING`, `FLOAT`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    String,
    Integer,
    Float,
    /// Calendar date kept as `YYYY-MM-DD` text until the sink boundary.
    Date,
    Datetime,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "STRING",
            Self::Integer => "INTEGER",
            Self::Float => "FLOAT",
            Self::Date => "DATE",
            Self::Datetime => "DATETIME",
        }
    }

    /// SQLite storage class used by the local warehouse.
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::String | Self::Date | Self::Datetime => "TEXT",
            Self::Integer => "INTEGER",
            Self::Float => "REAL",
        }
    }

    fn accepts(&self, kind: ValueKind) -> bool {
        matches!(
            (self, kind),
            (Self::String | Self::Date | Self::Datetime, ValueKind::Text)
                | (Self::Integer, ValueKind::Integer)
                | (Self::Float, ValueKind::Float)
        )
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A field that participates in change detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedField {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ColumnType,
}

/// A column of the library table loaded into the warehouse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ColumnType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackSchema {
    /// Fields compared by the changeset builder, in emission order.
    pub tracked: Vec<TrackedField>,
    /// Display fields whose nulls are reported after a scan.
    pub required: Vec<String>,
    /// Library table layout for the snapshot sink.
    pub columns: Vec<Column>,
}

impl Default for TrackSchema {
    fn default() -> Self {
        let tracked = [
            ("Major_Genre", ColumnType::String),
            ("Minor_Genre", ColumnType::String),
            ("Rating", ColumnType::Float),
            ("KPlay", ColumnType::Integer),
            ("Filename", ColumnType::String),
        ]
        .into_iter()
        .map(|(name, kind)| TrackedField {
            name: name.to_string(),
            kind,
        })
        .collect();

        let required = [
            "Title",
            "Artist",
            "Album_Artist",
            "Album",
            "Major_Genre",
            "BPM",
            "Key",
            "Year",
            "Rating",
            "Major_Language",
            "Gender",
            "DateAdded",
            "Time",
            "Bitrate",
            "Extension",
            "Filename",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        use ColumnType as T;
        let columns = [
            ("ID", T::Integer, false),
            ("Title", T::String, true),
            ("Artist", T::String, true),
            ("Album_Artist", T::String, true),
            ("Album", T::String, true),
            ("Major_Genre", T::String, true),
            ("Minor_Genre", T::String, true),
            ("BPM", T::Integer, true),
            ("Key", T::String, true),
            ("Year", T::Integer, true),
            ("Rating", T::Float, true),
            ("Major_Language", T::String, true),
            ("Minor_Language", T::String, true),
            ("Gender", T::String, true),
            ("DateAdded", T::Date, true),
            ("Energy", T::Integer, true),
            ("KPlay", T::Integer, true),
            ("Time", T::Float, false),
            ("Bitrate", T::Integer, false),
            ("Extension", T::String, false),
            ("Filename", T::String, false),
        ]
        .into_iter()
        .map(|(name, kind, nullable)| Column {
            name: name.to_string(),
            kind,
            nullable,
        })
        .collect();

        Self {
            tracked,
            required,
            columns,
        }
    }
}

impl TrackSchema {
    /// Parse and validate a schema from YAML. Sections left out keep their defaults.
    pub fn from_yaml(text: &str) -> Result<Self, SchemaError> {
        let schema: TrackSchema = serde_yaml::from_str(text)?;
        schema.validate()?;
        Ok(schema)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, SchemaError> {
        let text = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// Check every named column exists on a track record with a compatible type.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut seen = std::collections::HashSet::new();
        for field in &self.tracked {
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::Duplicate(field.name.clone()));
            }
            check_column(&field.name, Some(field.kind))?;
        }
        for name in &self.required {
            check_column(name, None)?;
        }
        let mut seen = std::collections::HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(SchemaError::Duplicate(column.name.clone()));
            }
            check_column(&column.name, Some(column.kind))?;
        }
        Ok(())
    }

    /// Keys every snapshot line must carry: identity, cache key and tracked fields.
    pub fn snapshot_keys(&self) -> Vec<&str> {
        let mut keys = vec![record::ID, record::FILENAME];
        for field in &self.tracked {
            if !keys.contains(&field.name.as_str()) {
                keys.push(field.name.as_str());
            }
        }
        keys
    }
}

fn check_column(name: &str, declared: Option<ColumnType>) -> Result<(), SchemaError> {
    let actual =
        record::column_kind(name).ok_or_else(|| SchemaError::UnknownColumn(name.to_string()))?;
    match declared {
        Some(declared) if !declared.accepts(actual) => Err(SchemaError::TypeMismatch {
            column: name.to_string(),
            declared,
            actual,
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schema_is_valid() {
        let schema = TrackSchema::default();
        schema.validate().unwrap();
        assert_eq!(schema.tracked.len(), 5);
        assert_eq!(
            schema.snapshot_keys(),
            vec!["ID", "Filename", "Major_Genre", "Minor_Genre", "Rating", "KPlay"]
        );
    }

    #[test]
    fn test_yaml_overrides_tracked_only() {
        let yaml = "
tracked:
  - name: Rating
    type: FLOAT
  - name: BPM
    type: INTEGER
";
        let schema = TrackSchema::from_yaml(yaml).unwrap();
        assert_eq!(schema.tracked.len(), 2);
        assert_eq!(schema.tracked[1].kind, ColumnType::Integer);
        // untouched sections keep their defaults
        assert_eq!(schema.columns, TrackSchema::default().columns);
    }

    #[test]
    fn test_yaml_unknown_column_rejected() {
        let yaml = "
tracked:
  - name: Mood
    type: STRING
";
        assert!(matches!(
            TrackSchema::from_yaml(yaml),
            Err(SchemaError::UnknownColumn(c)) if c == "Mood"
        ));
    }

    #[test]
    fn test_yaml_type_mismatch_rejected() {
        let yaml = "
tracked:
  - name: Rating
    type: INTEGER
";
        assert!(matches!(
            TrackSchema::from_yaml(yaml),
            Err(SchemaError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_date_column_holds_text() {
        let yaml = "
columns:
  - name: DateAdded
    type: DATE
  - name: ID
    type: INTEGER
    nullable: false
";
        let schema = TrackSchema::from_yaml(yaml).unwrap();
        assert!(schema.columns[0].nullable);
        assert!(!schema.columns[1].nullable);
    }

    #[test]
    fn test_duplicate_tracked_rejected() {
        let yaml = "
tracked:
  - name: Rating
    type: FLOAT
  - name: Rating
    type: FLOAT
";
        assert!(matches!(
            TrackSchema::from_yaml(yaml),
            Err(SchemaError::Duplicate(_))
        ));
    }
}
