use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const ID: &str = "ID";
pub const FILENAME: &str = "Filename";

/// Every column a track record carries, in serialization order.
pub const COLUMNS: &[&str] = &[
    "ID",
    "Title",
    "Artist",
    "Album_Artist",
    "Album",
    "Major_Genre",
    "Minor_Genre",
    "BPM",
    "Key",
    "Year",
    "Rating",
    "Major_Language",
    "Minor_Language",
    "Gender",
    "DateAdded",
    "Energy",
    "KPlay",
    "Time",
    "Bitrate",
    "Extension",
    "Filename",
];

/// Metadata of one audio file, as stored in a snapshot line.
///
/// `id` is `None` only between extraction and identity resolution; every
/// record inside a [`Snapshot`](super::Snapshot) carries one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    #[serde(rename = "ID", default, deserialize_with = "opt_int")]
    pub id: Option<i64>,
    #[serde(rename = "Title", default, deserialize_with = "opt_text")]
    pub title: Option<String>,
    #[serde(rename = "Artist", default, deserialize_with = "opt_text")]
    pub artist: Option<String>,
    #[serde(rename = "Album_Artist", default, deserialize_with = "opt_text")]
    pub album_artist: Option<String>,
    #[serde(rename = "Album", default, deserialize_with = "opt_text")]
    pub album: Option<String>,
    #[serde(rename = "Major_Genre", default, deserialize_with = "opt_text")]
    pub major_genre: Option<String>,
    #[serde(rename = "Minor_Genre", default, deserialize_with = "opt_text")]
    pub minor_genre: Option<String>,
    #[serde(rename = "BPM", default, deserialize_with = "opt_int")]
    pub bpm: Option<i64>,
    #[serde(rename = "Key", default, deserialize_with = "opt_text")]
    pub key: Option<String>,
    #[serde(rename = "Year", default, deserialize_with = "opt_int")]
    pub year: Option<i64>,
    #[serde(rename = "Rating", default, deserialize_with = "opt_float")]
    pub rating: Option<f64>,
    #[serde(rename = "Major_Language", default, deserialize_with = "opt_text")]
    pub major_language: Option<String>,
    #[serde(rename = "Minor_Language", default, deserialize_with = "opt_text")]
    pub minor_language: Option<String>,
    #[serde(rename = "Gender", default, deserialize_with = "opt_text")]
    pub gender: Option<String>,
    /// `YYYY-MM-DD`; converted to a timestamp only by the warehouse.
    #[serde(rename = "DateAdded", default, deserialize_with = "opt_text")]
    pub date_added: Option<String>,
    #[serde(rename = "Energy", default, deserialize_with = "opt_int")]
    pub energy: Option<i64>,
    #[serde(rename = "KPlay", default, deserialize_with = "opt_int")]
    pub kplay: Option<i64>,
    /// Duration in seconds.
    #[serde(rename = "Time", default, deserialize_with = "float_or_zero")]
    pub time: f64,
    /// Bits per second.
    #[serde(rename = "Bitrate", default, deserialize_with = "int_or_zero")]
    pub bitrate: i64,
    #[serde(rename = "Extension", default)]
    pub extension: String,
    #[serde(rename = "Filename")]
    pub filename: String,
}

/// Storage kind of a column value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Integer,
    Float,
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Float => "float",
        })
    }
}

/// A borrowed, typed view of one column of a record.
#[derive(Debug, Clone, Copy)]
pub enum FieldValue<'a> {
    Text(Option<&'a str>),
    Integer(Option<i64>),
    Float(Option<f64>),
}

impl FieldValue<'_> {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Text(_) => ValueKind::Text,
            Self::Integer(_) => ValueKind::Integer,
            Self::Float(_) => ValueKind::Float,
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            Self::Text(v) => v.is_none(),
            Self::Integer(v) => v.is_none(),
            Self::Float(v) => v.is_none(),
        }
    }

    /// Text form used in change records. Floats keep at least one decimal
    /// (`3.0`, `4.5`) so the text reads back as the same number.
    pub fn to_text(&self) -> Option<String> {
        match *self {
            Self::Text(v) => v.map(str::to_string),
            Self::Integer(v) => v.map(|i| i.to_string()),
            Self::Float(v) => v.map(|f| format!("{f:?}")),
        }
    }

    /// Equality used for change detection. Two nulls are equal, NaN equals NaN.
    /// Values of different kinds are never equal.
    pub fn same_as(&self, other: &FieldValue<'_>) -> bool {
        match (self, other) {
            (FieldValue::Text(a), FieldValue::Text(b)) => a == b,
            (FieldValue::Integer(a), FieldValue::Integer(b)) => a == b,
            (FieldValue::Float(a), FieldValue::Float(b)) => match (a, b) {
                (Some(x), Some(y)) => x == y || (x.is_nan() && y.is_nan()),
                (None, None) => true,
                _ => false,
            },
            _ => false,
        }
    }
}

/// Kind of a named column, or `None` if the record has no such column.
pub fn column_kind(name: &str) -> Option<ValueKind> {
    TrackRecord::default().value(name).map(|v| v.kind())
}

impl TrackRecord {
    /// Look up a column by its snapshot name.
    pub fn value(&self, column: &str) -> Option<FieldValue<'_>> {
        use FieldValue::*;
        let value = match column {
            "ID" => Integer(self.id),
            "Title" => Text(self.title.as_deref()),
            "Artist" => Text(self.artist.as_deref()),
            "Album_Artist" => Text(self.album_artist.as_deref()),
            "Album" => Text(self.album.as_deref()),
            "Major_Genre" => Text(self.major_genre.as_deref()),
            "Minor_Genre" => Text(self.minor_genre.as_deref()),
            "BPM" => Integer(self.bpm),
            "Key" => Text(self.key.as_deref()),
            "Year" => Integer(self.year),
            "Rating" => Float(self.rating),
            "Major_Language" => Text(self.major_language.as_deref()),
            "Minor_Language" => Text(self.minor_language.as_deref()),
            "Gender" => Text(self.gender.as_deref()),
            "DateAdded" => Text(self.date_added.as_deref()),
            "Energy" => Integer(self.energy),
            "KPlay" => Integer(self.kplay),
            "Time" => Float(Some(self.time)),
            "Bitrate" => Integer(Some(self.bitrate)),
            "Extension" => Text(Some(self.extension.as_str())),
            "Filename" => Text(Some(self.filename.as_str())),
            _ => return None,
        };
        Some(value)
    }

    /// `[Title, Artist]` label used in data-quality warnings.
    pub fn label(&self) -> String {
        format!(
            "[{}, {}]",
            self.title.as_deref().unwrap_or("None"),
            self.artist.as_deref().unwrap_or("None")
        )
    }
}

// Older snapshots stored several numeric tags as strings ("128", "3.0") and
// some writers emit integral floats for integer columns. Accept all of them.

fn opt_int<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    let value = Value::deserialize(d)?;
    lenient_int(&value).map_err(serde::de::Error::custom)
}

fn opt_float<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    let value = Value::deserialize(d)?;
    lenient_float(&value).map_err(serde::de::Error::custom)
}

fn opt_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    match Value::deserialize(d)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "expected text, found {other}"
        ))),
    }
}

fn int_or_zero<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    opt_int(d).map(|v| v.unwrap_or(0))
}

fn float_or_zero<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    opt_float(d).map(|v| v.unwrap_or(0.0))
}

pub(crate) fn lenient_int(value: &Value) -> Result<Option<i64>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Some(i))
            } else {
                n.as_f64()
                    .and_then(integral)
                    .map(Some)
                    .ok_or_else(|| format!("expected an integer, found {n}"))
            }
        }
        Value::String(s) => parse_int_text(s).map_err(|_| format!("expected an integer, found {s:?}")),
        other => Err(format!("expected an integer, found {other}")),
    }
}

pub(crate) fn lenient_float(value: &Value) -> Result<Option<f64>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() || s.eq_ignore_ascii_case("nan") || s == "None" {
                return Ok(None);
            }
            s.parse::<f64>()
                .map(Some)
                .map_err(|_| format!("expected a number, found {s:?}"))
        }
        other => Err(format!("expected a number, found {other}")),
    }
}

/// Parse integer text such as `"128"`, `" 7 "` or `"128.0"`. Blank, `nan`
/// and `None` read as null.
pub fn parse_int_text(s: &str) -> Result<Option<i64>, std::num::ParseIntError> {
    let s = s.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("nan") || s == "None" || s == "<NA>" {
        return Ok(None);
    }
    match s.parse::<i64>() {
        Ok(i) => Ok(Some(i)),
        Err(e) => s
            .parse::<f64>()
            .ok()
            .and_then(integral)
            .map(Some)
            .ok_or(e),
    }
}

fn integral(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 {
        Some(f as i64)
    } else {
        None
    }
}
