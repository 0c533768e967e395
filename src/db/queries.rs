use super::models::{DiffRow, LibraryLoad, WarehouseStats};
use super::{Database, DbError, Result};
use crate::changeset::{Changeset, DATETIME_FORMAT};
use crate::schema::{ColumnType, TrackSchema};
use crate::snapshot::Snapshot;
use crate::snapshot::record::{FieldValue, TrackRecord};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::params;
use rusqlite::types::Value;

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Coerce date-like text to an ISO-8601 timestamp. Plain dates get midnight.
pub fn coerce_timestamp(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0).map(|dt| dt.format(ISO_FORMAT).to_string());
    }
    [ISO_FORMAT, "%Y-%m-%d %H:%M:%S", DATETIME_FORMAT]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|dt| dt.format(ISO_FORMAT).to_string())
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn sql_value(record: &TrackRecord, column: &str, kind: ColumnType) -> Value {
    let Some(value) = record.value(column) else {
        return Value::Null;
    };
    match kind {
        ColumnType::Date | ColumnType::Datetime => match value.to_text() {
            None => Value::Null,
            Some(text) => match coerce_timestamp(&text) {
                Some(ts) => Value::Text(ts),
                None => {
                    log::warn!(
                        "Column `{column}` has unparsable date {text:?}: {}; loading NULL",
                        record.label()
                    );
                    Value::Null
                }
            },
        },
        _ => match value {
            FieldValue::Text(Some(s)) => Value::Text(s.to_string()),
            FieldValue::Integer(Some(i)) => Value::Integer(i),
            FieldValue::Float(Some(f)) => Value::Real(f),
            _ => Value::Null,
        },
    }
}

impl Database {
    /// Replace the `library` table with `snapshot`, in one transaction.
    /// Columns come from the schema; every row is stamped with `report_time`.
    pub fn replace_library(
        &self,
        snapshot: &Snapshot,
        schema: &TrackSchema,
        report_time: NaiveDateTime,
    ) -> Result<usize> {
        let report_time = report_time.format(ISO_FORMAT).to_string();
        let mut defs: Vec<String> = schema
            .columns
            .iter()
            .map(|c| {
                let null = if c.nullable { "" } else { " NOT NULL" };
                format!("{} {}{}", quote(&c.name), c.kind.sql_type(), null)
            })
            .collect();
        defs.push("\"Report_Time\" TEXT NOT NULL".to_string());

        let names: Vec<String> = schema
            .columns
            .iter()
            .map(|c| quote(&c.name))
            .chain(std::iter::once(quote("Report_Time")))
            .collect();
        let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{i}")).collect();
        let insert = format!(
            "INSERT INTO library ({}) VALUES ({})",
            names.join(", "),
            placeholders.join(", ")
        );

        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch("DROP TABLE IF EXISTS library")?;
        tx.execute_batch(&format!("CREATE TABLE library ({})", defs.join(", ")))?;
        {
            let mut stmt = tx.prepare(&insert)?;
            for record in snapshot.iter() {
                let values = schema
                    .columns
                    .iter()
                    .map(|c| sql_value(record, &c.name, c.kind))
                    .chain(std::iter::once(Value::Text(report_time.clone())));
                stmt.execute(rusqlite::params_from_iter(values))?;
            }
        }
        tx.execute(
            "INSERT INTO library_loads (report_time, row_count) VALUES (?1, ?2)",
            params![report_time, snapshot.len() as i64],
        )?;
        tx.commit()?;

        log::info!("Loaded {} rows into library table", snapshot.len());
        Ok(snapshot.len())
    }

    /// Append a changeset to the `diff` table. An empty changeset writes
    /// nothing and returns 0.
    pub fn append_changeset(&self, changeset: &Changeset) -> Result<usize> {
        if changeset.is_empty() {
            log::info!("Empty changeset, nothing appended");
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO diff (op, id, field_name, field_type, old_val, new_val, datetime, remarks)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for r in changeset.iter() {
                let datetime = NaiveDateTime::parse_from_str(&r.datetime, DATETIME_FORMAT)
                    .map_err(|_| DbError::BadDatetime(r.datetime.clone()))?
                    .format(ISO_FORMAT)
                    .to_string();
                stmt.execute(params![
                    r.op.as_str(),
                    r.id,
                    r.field_name,
                    r.field_type.map(|t| t.as_str()),
                    r.old_val,
                    r.new_val,
                    datetime,
                    r.remarks,
                ])?;
            }
        }
        tx.commit()?;

        log::info!("Appended {} rows to diff table", changeset.len());
        Ok(changeset.len())
    }

    /// Most recent diff rows, newest first.
    pub fn recent_changes(&self, limit: usize) -> Result<Vec<DiffRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT op, id, field_name, field_type, old_val, new_val, datetime, remarks
             FROM diff ORDER BY datetime DESC, rowid ASC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(DiffRow {
                    op: row.get(0)?,
                    id: row.get(1)?,
                    field_name: row.get(2)?,
                    field_type: row.get(3)?,
                    old_val: row.get(4)?,
                    new_val: row.get(5)?,
                    datetime: row.get(6)?,
                    remarks: row.get(7)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Warehouse summary.
    pub fn stats(&self) -> Result<WarehouseStats> {
        let has_library: bool = self.conn.query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'library'",
            [],
            |row| row.get(0),
        )?;
        let library_rows: i64 = if has_library {
            self.conn
                .query_row("SELECT COUNT(*) FROM library", [], |row| row.get(0))?
        } else {
            0
        };

        let diff_rows: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM diff", [], |row| row.get(0))?;

        let mut op_stmt = self
            .conn
            .prepare("SELECT op, COUNT(*) FROM diff GROUP BY op ORDER BY COUNT(*) DESC")?;
        let ops: Vec<(String, i64)> = op_stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let last_load = match self.conn.query_row(
            "SELECT report_time, row_count FROM library_loads ORDER BY id DESC LIMIT 1",
            [],
            |row| {
                Ok(LibraryLoad {
                    report_time: row.get(0)?,
                    row_count: row.get(1)?,
                })
            },
        ) {
            Ok(load) => Some(load),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };

        Ok(WarehouseStats {
            library_rows,
            diff_rows,
            ops,
            last_load,
        })
    }
}
