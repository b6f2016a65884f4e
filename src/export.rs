// src/export.rs

use crate::invoice::{COLUMNS, InvoiceRow, cell_text};
use std::io;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV output is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

fn write_rows<W: io::Write>(
    wtr: &mut csv::Writer<W>,
    rows: &[InvoiceRow],
) -> Result<(), ExportError> {
    wtr.write_record(COLUMNS)?;
    for row in rows {
        wtr.write_record(row.cells().map(cell_text))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Render the row table as CSV, header first, columns in schema order.
pub fn rows_to_csv(rows: &[InvoiceRow]) -> Result<String, ExportError> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    write_rows(&mut wtr, rows)?;
    let bytes = wtr.into_inner().map_err(|e| e.into_error())?;
    Ok(String::from_utf8(bytes)?)
}

pub fn write_csv(path: impl AsRef<Path>, rows: &[InvoiceRow]) -> Result<(), ExportError> {
    let mut wtr = csv::Writer::from_path(path)?;
    write_rows(&mut wtr, rows)
}
