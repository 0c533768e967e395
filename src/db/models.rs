/// A row of the `diff` table as read back.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffRow {
    pub op: String,
    pub id: i64,
    pub field_name: Option<String>,
    pub field_type: Option<String>,
    pub old_val: Option<String>,
    pub new_val: Option<String>,
    pub datetime: String,
    pub remarks: Option<String>,
}

/// One full replace of the `library` table.
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryLoad {
    pub report_time: String,
    pub row_count: i64,
}

#[derive(Debug, Clone, Default)]
pub struct WarehouseStats {
    pub library_rows: i64,
    pub diff_rows: i64,
    /// Diff rows per op code, most frequent first.
    pub ops: Vec<(String, i64)>,
    pub last_load: Option<LibraryLoad>,
}
