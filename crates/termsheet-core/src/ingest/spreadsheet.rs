use std::io::Cursor;

use calamine::Reader;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpreadsheetError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Workbook error: {0}")]
    Workbook(String),
    #[error("Workbook has no worksheets")]
    NoWorksheet,
    #[error("Spreadsheet has no rows")]
    Empty,
}

pub type SpreadsheetResult<T> = Result<T, SpreadsheetError>;

/// Header row plus data rows, all cells already rendered as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    fn from_rows(mut rows: Vec<Vec<String>>) -> SpreadsheetResult<Self> {
        if rows.is_empty() {
            return Err(SpreadsheetError::Empty);
        }
        let header = rows.remove(0);
        Ok(Self { header, rows })
    }

    /// Aligned plain-text rendering with a leading row-index column.
    #[must_use]
    pub fn render(&self) -> String {
        let columns = self
            .rows
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(self.header.len()))
            .max()
            .unwrap_or(0);

        let cell = |row: &[String], i: usize| row.get(i).map_or("", String::as_str).to_string();

        let mut widths: Vec<usize> = (0..columns)
            .map(|i| cell(&self.header, i).chars().count())
            .collect();
        for row in &self.rows {
            for (i, width) in widths.iter_mut().enumerate() {
                *width = (*width).max(cell(row, i).chars().count());
            }
        }

        let index_width = self.rows.len().saturating_sub(1).to_string().len();

        let mut lines = Vec::with_capacity(self.rows.len() + 1);
        lines.push(render_line(
            &" ".repeat(index_width),
            &self.header,
            &widths,
        ));
        for (n, row) in self.rows.iter().enumerate() {
            lines.push(render_line(
                &format!("{n:<index_width$}"),
                row,
                &widths,
            ));
        }
        lines.join("\n")
    }
}

fn render_line(index: &str, row: &[String], widths: &[usize]) -> String {
    let mut line = index.to_string();
    for (i, width) in widths.iter().enumerate() {
        let value = row.get(i).map_or("", String::as_str);
        line.push_str("  ");
        line.push_str(&format!("{value:>width$}"));
    }
    line.trim_end().to_string()
}

pub fn read_csv(data: &[u8]) -> SpreadsheetResult<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(data);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(|c| c.trim().to_string()).collect());
    }

    Table::from_rows(rows)
}

/// First worksheet of an XLSX, XLS, or ODS workbook.
pub fn read_workbook(data: &[u8]) -> SpreadsheetResult<Table> {
    let mut workbook = calamine::open_workbook_auto_from_rs(Cursor::new(data.to_vec()))
        .map_err(|e| SpreadsheetError::Workbook(e.to_string()))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or(SpreadsheetError::NoWorksheet)?
        .map_err(|e| SpreadsheetError::Workbook(e.to_string()))?;

    let rows = range
        .rows()
        .map(|row| row.iter().map(ToString::to_string).collect())
        .collect();

    Table::from_rows(rows)
}
