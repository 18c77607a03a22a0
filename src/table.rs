//! Plain-text table rendering for terminal reports.

use std::borrow::Cow;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Align {
    #[default]
    Left,
    Right,
}

#[derive(Debug, Clone, Default)]
pub struct TextTable {
    headers: Vec<String>,
    align: Vec<Align>,
    rows: Vec<Vec<String>>,
}

impl TextTable {
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let headers: Vec<String> = headers.into_iter().map(Into::into).collect();
        let align = vec![Align::Left; headers.len()];
        TextTable {
            headers,
            align,
            rows: Vec::new(),
        }
    }

    /// Right-aligns the given column indexes (counts, sizes).
    pub fn right_align(mut self, columns: &[usize]) -> Self {
        for idx in columns {
            if let Some(slot) = self.align.get_mut(*idx) {
                *slot = Align::Right;
            }
        }
        self
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn widths(&self) -> Vec<usize> {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (idx, cell) in row.iter().enumerate().take(widths.len()) {
                widths[idx] = widths[idx].max(sanitize(cell).chars().count());
            }
        }
        widths.into_iter().map(|w| w.max(1)).collect()
    }

    fn format_line(&self, cells: &[String], widths: &[usize]) -> String {
        let mut line = String::new();
        for (idx, width) in widths.iter().enumerate() {
            if idx > 0 {
                line.push_str("  ");
            }
            let cell = cells.get(idx).map(|c| sanitize(c)).unwrap_or_default();
            let _ = match self.align[idx] {
                Align::Left => write!(line, "{cell:<width$}"),
                Align::Right => write!(line, "{cell:>width$}"),
            };
        }
        line.trim_end().to_string()
    }

    pub fn render(&self) -> String {
        let widths = self.widths();
        let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        let mut output = String::new();
        let _ = writeln!(output, "{}", self.format_line(&self.headers, &widths));
        let _ = writeln!(output, "{}", self.format_line(&separator, &widths));
        for row in &self.rows {
            let _ = writeln!(output, "{}", self.format_line(row, &widths));
        }
        output
    }

    pub fn print(&self) {
        print!("{}", self.render());
    }
}

/// Flattens embedded line breaks and tabs so every row stays on one line.
fn sanitize(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}
