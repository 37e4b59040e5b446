//! Aligned plain-text tables for CLI listings.

use std::fmt::{self, Write as _};

#[derive(Debug, Clone, Default)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row<I, S>(&mut self, cells: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rows.push(cells.into_iter().map(Into::into).collect());
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn widths(&self) -> Vec<usize> {
        let mut widths = self
            .headers
            .iter()
            .map(|h| h.chars().count().max(3))
            .collect::<Vec<_>>();
        for row in &self.rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(flatten(cell).chars().count());
            }
        }
        widths
    }
}

/// Replaces line breaks and tabs so each row stays on one line.
fn flatten(cell: &str) -> String {
    cell.replace(['\n', '\r', '\t'], " ")
}

fn write_line(out: &mut String, cells: &[String], widths: &[usize]) -> fmt::Result {
    let mut line = String::new();
    for (idx, width) in widths.iter().enumerate() {
        if idx > 0 {
            line.push_str("  ");
        }
        let cell = cells.get(idx).map(|c| flatten(c)).unwrap_or_default();
        write!(line, "{cell:<width$}")?;
    }
    writeln!(out, "{}", line.trim_end())
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let widths = self.widths();
        let mut out = String::new();
        write_line(&mut out, &self.headers, &widths)?;
        let rule = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
        write_line(&mut out, &rule, &widths)?;
        for row in &self.rows {
            write_line(&mut out, row, &widths)?;
        }
        f.write_str(&out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_are_padded_to_widest_cell() {
        let mut table = Table::new(["name", "kind"]);
        table.push_row(["owner", "foreign-key"]);
        table.push_row(["id", "integer"]);
        let rendered = table.to_string();
        let lines = rendered.lines().collect::<Vec<_>>();
        assert_eq!(
            lines,
            vec![
                "name   kind",
                "-----  -----------",
                "owner  foreign-key",
                "id     integer",
            ]
        );
    }

    #[test]
    fn control_characters_are_flattened() {
        let mut table = Table::new(["note"]);
        table.push_row(["a\nb\tc"]);
        assert_eq!(table.to_string().lines().nth(2), Some("a b c"));
    }
}
