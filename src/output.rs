/// Output Formatter Module
///
/// Renders query records as they stream out of the execution engine, in the
/// format selected by the session (`pairs`, `json` or `rows`). Only rows
/// inside the session window are written; nothing is buffered.
use crate::config::{OutputFormat, RowsLayout, SessionConfig};
use crate::core::db::{Record, RecordSink};
use crate::core::Result;
use crossterm::style::Stylize;
use std::io::Write;

pub struct OutputFormatter<'a> {
    out: &'a mut dyn Write,
    config: &'a SessionConfig,
    columns: Vec<String>,
}

impl<'a> OutputFormatter<'a> {
    pub fn new(out: &'a mut dyn Write, config: &'a SessionConfig) -> Self {
        OutputFormatter {
            out,
            config,
            columns: Vec::new(),
        }
    }

    fn write_pairs(&mut self, record: &Record) -> Result<()> {
        let width = record.iter().map(|(key, _)| key.chars().count()).max().unwrap_or(0);
        writeln!(self.out)?;
        for (key, value) in record.iter() {
            let key = format!("{:>width$}", key, width = width);
            if self.config.color {
                writeln!(self.out, "{}: {}", key.cyan(), value)?;
            } else {
                writeln!(self.out, "{}: {}", key, value)?;
            }
        }
        Ok(())
    }

    fn write_json(&mut self, record: &Record) -> Result<()> {
        serde_json::to_writer(&mut *self.out, record)?;
        writeln!(self.out)?;
        Ok(())
    }

    fn write_header(&mut self, layout: RowsLayout) -> Result<()> {
        let cells: Vec<String> = self.columns.clone();
        let line = self.align(layout, &cells);
        if self.config.color {
            writeln!(self.out, "{}", line.bold())?;
        } else {
            writeln!(self.out, "{}", line)?;
        }
        Ok(())
    }

    fn write_row(&mut self, layout: RowsLayout, record: &Record) -> Result<()> {
        let cells: Vec<String> = self
            .columns
            .iter()
            .map(|column| record.get(column).map(|v| v.to_string()).unwrap_or_default())
            .collect();
        let line = self.align(layout, &cells);
        writeln!(self.out, "{}", line)?;
        Ok(())
    }

    /// Pads every cell to its column width; the line has no trailing blanks.
    fn align(&self, layout: RowsLayout, cells: &[String]) -> String {
        let mut line = String::new();
        for (cell, column) in cells.iter().zip(&self.columns) {
            let width = column_width(layout, column.chars().count());
            let len = cell.chars().count();
            line.push_str(cell);
            let pad = if len < width { width - len } else { layout.padding.max(1) };
            line.push_str(&" ".repeat(pad));
        }
        line.trim_end().to_string()
    }
}

/// Width of a column whose header is `header_len` characters: at least
/// `min_width`, at least header plus padding, rounded up to a tab stop.
pub fn column_width(layout: RowsLayout, header_len: usize) -> usize {
    let width = layout.min_width.max(header_len.saturating_add(layout.padding));
    if layout.tab_width == 0 {
        return width;
    }
    width
        .div_ceil(layout.tab_width)
        .checked_mul(layout.tab_width)
        .unwrap_or(width)
}

impl RecordSink for OutputFormatter<'_> {
    fn columns(&mut self, columns: &[String]) -> Result<()> {
        self.columns = columns.to_vec();
        Ok(())
    }

    fn record(&mut self, index: usize, record: &Record) -> Result<()> {
        // The header goes out with the first row the engine produces,
        // whether or not that row is inside the window.
        if let OutputFormat::Rows(layout) = self.config.format {
            if index == 0 {
                self.write_header(layout)?;
            }
        }
        if !self.config.in_window(index) {
            return Ok(());
        }
        match self.config.format {
            OutputFormat::Pairs => self.write_pairs(record),
            OutputFormat::Json => self.write_json(record),
            OutputFormat::Rows(layout) => self.write_row(layout, record),
        }
    }
}
