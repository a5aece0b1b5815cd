//! # Regions
//!
//! A rectangular area of one sheet, addressed in A1 notation.
//!
//! Supported forms:
//!
//! | Notation          | Rows        | Columns     |
//! |-------------------|-------------|-------------|
//! | `Sheet1`          | all         | all         |
//! | `Sheet1!B4`       | 4           | B           |
//! | `Sheet1!A1:C10`   | 1..=10      | A..=C       |
//! | `Sheet1!B:D`      | all         | B..=D       |
//! | `Sheet1!3:7`      | 3..=7       | all         |
//! | `Sheet1!A3:B`     | 3..         | A..=B       |
//! | `Sheet1!B3:`      | 3..         | B..         |
//!
//! Internally rows and columns are zero-based half-open spans whose end may be unbounded.
//! Sheet names containing anything other than ASCII alphanumerics or `_` are quoted
//! (`'Q1 Budget'!A1`), with embedded quotes doubled.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegionParseError {
    #[error("region is empty")]
    Empty,
    #[error("sheet name is empty in '{0}'")]
    EmptySheet(String),
    #[error("invalid cell reference '{reference}' in '{input}'")]
    InvalidReference { input: String, reference: String },
    #[error("range end precedes start in '{0}'")]
    Reversed(String),
    #[error("unterminated sheet name quote in '{0}'")]
    UnterminatedQuote(String),
}

/// Zero-based half-open interval; `end == None` means unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Span {
    pub start: u32,
    pub end: Option<u32>,
}

impl Span {
    pub const FULL: Span = Span {
        start: 0,
        end: None,
    };

    pub fn new(start: u32, end: Option<u32>) -> Self {
        Self { start, end }
    }

    pub fn single(index: u32) -> Self {
        Self {
            start: index,
            end: Some(index.saturating_add(1)),
        }
    }

    pub fn len(&self) -> Option<u64> {
        self.end
            .map(|end| u64::from(end.saturating_sub(self.start)))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    pub fn is_bounded(&self) -> bool {
        self.end.is_some()
    }

    pub fn is_full(&self) -> bool {
        self.start == 0 && self.end.is_none()
    }

    pub fn contains(&self, index: u32) -> bool {
        index >= self.start && self.end.map_or(true, |end| index < end)
    }

    pub fn intersects(&self, other: &Span) -> bool {
        let self_end = self.end.map_or(u64::MAX, u64::from);
        let other_end = other.end.map_or(u64::MAX, u64::from);
        u64::from(self.start) < other_end && u64::from(other.start) < self_end
    }

    /// Clip an unbounded end to `extent` (exclusive)
    pub fn clip(&self, extent: u32) -> Span {
        Span {
            start: self.start,
            end: Some(self.end.unwrap_or(extent).max(self.start)),
        }
    }
}

/// A rectangular area of one sheet
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Region {
    sheet: String,
    rows: Span,
    columns: Span,
}

impl Region {
    pub fn new(sheet: impl Into<String>, rows: Span, columns: Span) -> Self {
        Self {
            sheet: sheet.into(),
            rows,
            columns,
        }
    }

    pub fn whole_sheet(sheet: impl Into<String>) -> Self {
        Self::new(sheet, Span::FULL, Span::FULL)
    }

    /// A single cell, zero-based
    pub fn cell(sheet: impl Into<String>, row: u32, column: u32) -> Self {
        Self::new(sheet, Span::single(row), Span::single(column))
    }

    pub fn parse(input: &str) -> Result<Self, RegionParseError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(RegionParseError::Empty);
        }

        let (sheet, range) = split_sheet(trimmed)?;
        if sheet.is_empty() {
            return Err(RegionParseError::EmptySheet(input.to_string()));
        }

        let Some(range) = range else {
            return Ok(Self::whole_sheet(sheet));
        };

        let invalid = |reference: &str| RegionParseError::InvalidReference {
            input: input.to_string(),
            reference: reference.to_string(),
        };

        match range.split_once(':') {
            None => {
                let (column, row) = parse_reference(range).ok_or_else(|| invalid(range))?;
                match (column, row) {
                    (Some(column), Some(row)) => Ok(Self::cell(sheet, row, column)),
                    _ => Err(invalid(range)),
                }
            }
            Some((start, end)) => {
                let (start_column, start_row) =
                    parse_reference(start).ok_or_else(|| invalid(start))?;
                let (end_column, end_row) = parse_reference(end).ok_or_else(|| invalid(end))?;
                if start.is_empty() {
                    return Err(invalid(start));
                }

                let rows = Span::new(start_row.unwrap_or(0), end_row.map(|row| row + 1));
                let columns = Span::new(
                    start_column.unwrap_or(0),
                    end_column.map(|column| column + 1),
                );

                if rows.is_empty()
                    || columns.is_empty()
                    || rows.end.is_some_and(|end| end < rows.start)
                    || columns.end.is_some_and(|end| end < columns.start)
                {
                    return Err(RegionParseError::Reversed(input.to_string()));
                }

                Ok(Self::new(sheet, rows, columns))
            }
        }
    }

    pub fn sheet(&self) -> &str {
        &self.sheet
    }

    pub fn rows(&self) -> Span {
        self.rows
    }

    pub fn columns(&self) -> Span {
        self.columns
    }

    /// Same sheet and both the row and the column intervals intersect
    pub fn overlaps(&self, other: &Region) -> bool {
        self.sheet == other.sheet
            && self.rows.intersects(&other.rows)
            && self.columns.intersects(&other.columns)
    }

    /// Number of cells, `None` when either dimension is unbounded
    pub fn cell_count(&self) -> Option<u64> {
        Some(self.rows.len()?.saturating_mul(self.columns.len()?))
    }

    pub fn is_bounded(&self) -> bool {
        self.rows.is_bounded() && self.columns.is_bounded()
    }

    pub fn is_whole_sheet(&self) -> bool {
        self.rows.is_full() && self.columns.is_full()
    }

    pub fn contains_cell(&self, row: u32, column: u32) -> bool {
        self.rows.contains(row) && self.columns.contains(column)
    }

    /// The whole sheet this region lives on
    pub fn sheet_region(&self) -> Region {
        Self::whole_sheet(self.sheet.clone())
    }

    /// Replace unbounded ends with the given data extent
    pub fn clip(&self, row_extent: u32, column_extent: u32) -> Region {
        Self::new(
            self.sheet.clone(),
            self.rows.clip(row_extent),
            self.columns.clip(column_extent),
        )
    }

    /// A bounded region anchored at this region's top-left corner
    pub fn with_size(&self, rows: u32, columns: u32) -> Region {
        Self::new(
            self.sheet.clone(),
            Span::new(self.rows.start, Some(self.rows.start.saturating_add(rows))),
            Span::new(
                self.columns.start,
                Some(self.columns.start.saturating_add(columns)),
            ),
        )
    }

    /// `Sheet!B4` label of a zero-based cell on this region's sheet
    pub fn cell_label(&self, row: u32, column: u32) -> String {
        format!(
            "{}!{}{}",
            quote_sheet(&self.sheet),
            column_letters(column),
            u64::from(row) + 1
        )
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sheet = quote_sheet(&self.sheet);
        if self.is_whole_sheet() {
            return f.write_str(&sheet);
        }

        if self.rows.len() == Some(1) && self.columns.len() == Some(1) {
            return write!(
                f,
                "{sheet}!{}{}",
                column_letters(self.columns.start),
                u64::from(self.rows.start) + 1
            );
        }

        let mut start = String::new();
        if !self.columns.is_full() {
            start.push_str(&column_letters(self.columns.start));
        }
        if !self.rows.is_full() {
            start.push_str(&(u64::from(self.rows.start) + 1).to_string());
        }

        let mut end = String::new();
        if let Some(column_end) = self.columns.end {
            end.push_str(&column_letters(column_end.saturating_sub(1)));
        }
        if let Some(row_end) = self.rows.end {
            end.push_str(&row_end.to_string());
        }

        write!(f, "{sheet}!{start}:{end}")
    }
}

impl FromStr for Region {
    type Err = RegionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Region {
    type Error = RegionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Region> for String {
    fn from(region: Region) -> Self {
        region.to_string()
    }
}

/// Zero-based column index to letters (`0 -> A`, `26 -> AA`)
pub fn column_letters(index: u32) -> String {
    let mut n = u64::from(index) + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = ((n - 1) % 26) as u8;
        letters.push(char::from(b'A' + rem));
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

fn parse_column(letters: &str) -> Option<u32> {
    let mut value: u64 = 0;
    for ch in letters.chars() {
        let ch = ch.to_ascii_uppercase();
        if !ch.is_ascii_uppercase() {
            return None;
        }
        value = value * 26 + u64::from(ch as u8 - b'A' + 1);
        if value > u64::from(u32::MAX) {
            return None;
        }
    }
    u32::try_from(value.checked_sub(1)?).ok()
}

/// Parse `B4`, `B`, `4` or the empty string into zero-based (column, row)
fn parse_reference(reference: &str) -> Option<(Option<u32>, Option<u32>)> {
    let reference = reference.trim().replace('$', "");
    let split = reference
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(reference.len());
    let (letters, digits) = reference.split_at(split);

    let column = if letters.is_empty() {
        None
    } else {
        Some(parse_column(letters)?)
    };

    let row = if digits.is_empty() {
        None
    } else {
        let row: u32 = digits.parse().ok()?;
        Some(row.checked_sub(1)?)
    };

    Some((column, row))
}

fn split_sheet(input: &str) -> Result<(String, Option<&str>), RegionParseError> {
    if let Some(rest) = input.strip_prefix('\'') {
        let mut sheet = String::new();
        let mut chars = rest.char_indices().peekable();
        while let Some((i, ch)) = chars.next() {
            if ch == '\'' {
                if matches!(chars.peek(), Some((_, '\''))) {
                    sheet.push('\'');
                    chars.next();
                    continue;
                }
                let remainder = &rest[i + 1..];
                return match remainder.strip_prefix('!') {
                    Some(range) => Ok((sheet, Some(range))),
                    None if remainder.is_empty() => Ok((sheet, None)),
                    None => Err(RegionParseError::InvalidReference {
                        input: input.to_string(),
                        reference: remainder.to_string(),
                    }),
                };
            }
            sheet.push(ch);
        }
        return Err(RegionParseError::UnterminatedQuote(input.to_string()));
    }

    Ok(match input.rsplit_once('!') {
        Some((sheet, range)) => (sheet.to_string(), Some(range)),
        None => (input.to_string(), None),
    })
}

fn quote_sheet(sheet: &str) -> String {
    if sheet.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        sheet.to_string()
    } else {
        format!("'{}'", sheet.replace('\'', "''"))
    }
}
