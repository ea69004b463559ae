use crate::error::{DataError, Result};
use crate::table::FlatTable;
use csv::Writer;
use serde_json::Value;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

pub struct CsvStorage;

impl CsvStorage {
    /// Writes a flattened table to a CSV file, header first.
    ///
    /// Null cells are written empty; strings as-is; anything else as JSON text.
    ///
    /// # Errors
    /// Returns error if file cannot be created or writing fails
    pub fn write_table(path: impl AsRef<Path>, table: &FlatTable) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| DataError::io(parent, e))?;
            }
        }

        let file = File::create(path).map_err(|e| DataError::io(path, e))?;
        Self::write_table_to(file, table)?;
        Ok(())
    }

    /// Writes a flattened table as CSV to any writer.
    ///
    /// # Errors
    /// Returns error if writing fails
    pub fn write_table_to<W: Write>(writer: W, table: &FlatTable) -> Result<()> {
        let columns = table.columns();
        let mut writer = Writer::from_writer(writer);
        writer.write_record(&columns)?;

        for row in 0..table.height() {
            writer.write_record(columns.iter().map(|c| cell_text(&table.cell(row, c))))?;
        }

        writer.flush().map_err(|e| DataError::io("<csv writer>", e))?;
        Ok(())
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
