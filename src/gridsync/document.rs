//! Grid document contract and the in-memory implementation.
//!
//! The external document is a labeled 2-D grid (spreadsheet-like). Exactly
//! one axis carries human-entered period labels; the adapter never assumes
//! positions, only labels. `apply` must be atomic on the document side:
//! either every update in the batch lands or none do.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;

use crate::error::Result;

/// One cell value as the document stores it. Period labels may appear as
/// text tokens, native dates, or numeric date serials.
#[derive(Debug, Clone, PartialEq)]
pub enum GridValue {
    Blank,
    Number(f64),
    Text(String),
    Date(NaiveDate),
}

impl GridValue {
    pub fn is_blank(&self) -> bool {
        matches!(self, GridValue::Blank)
    }

    /// Stable token used for fingerprinting.
    pub(crate) fn canonical_token(&self) -> String {
        match self {
            GridValue::Blank => "~".to_string(),
            GridValue::Number(n) => format!("n{}", n),
            GridValue::Text(s) => format!("t{}", s),
            GridValue::Date(d) => format!("d{}", d),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CellUpdate {
    pub row: usize,
    pub col: usize,
    pub value: GridValue,
}

/// Externally supplied protected-coordinate registry: cells the adapter must
/// never write because the document owns them (formulas, computed columns).
/// Configuration, not code - layout changes never require a code change.
#[derive(Debug, Clone, Default)]
pub struct ProtectedCells {
    cells: HashSet<(usize, usize)>,
    rows: HashSet<usize>,
    cols: HashSet<usize>,
}

impl ProtectedCells {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn protect_cell(&mut self, row: usize, col: usize) {
        self.cells.insert((row, col));
    }

    pub fn protect_row(&mut self, row: usize) {
        self.rows.insert(row);
    }

    pub fn protect_col(&mut self, col: usize) {
        self.cols.insert(col);
    }

    pub fn is_protected(&self, row: usize, col: usize) -> bool {
        self.cells.contains(&(row, col)) || self.rows.contains(&row) || self.cols.contains(&col)
    }
}

/// Access to one target grid document for the duration of a sync pass.
#[async_trait]
pub trait GridDocument: Send + Sync {
    /// (rows, cols) of the used range.
    async fn dimensions(&self) -> Result<(usize, usize)>;

    async fn read_row(&self, row: usize) -> Result<Vec<GridValue>>;

    async fn read_column(&self, col: usize) -> Result<Vec<GridValue>>;

    /// Apply a batch of cell updates atomically.
    async fn apply(&self, updates: &[CellUpdate]) -> Result<()>;
}

/// In-memory grid used by the test suite and for dry runs.
pub struct InMemoryGrid {
    cells: Mutex<Vec<Vec<GridValue>>>,
}

impl InMemoryGrid {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            cells: Mutex::new(vec![vec![GridValue::Blank; cols]; rows]),
        }
    }

    pub fn from_rows(rows: Vec<Vec<GridValue>>) -> Self {
        Self {
            cells: Mutex::new(rows),
        }
    }

    pub fn get(&self, row: usize, col: usize) -> GridValue {
        let cells = self.cells.lock();
        cells
            .get(row)
            .and_then(|r| r.get(col))
            .cloned()
            .unwrap_or(GridValue::Blank)
    }

    pub fn set(&self, row: usize, col: usize, value: GridValue) {
        let mut cells = self.cells.lock();
        if let Some(r) = cells.get_mut(row) {
            if let Some(c) = r.get_mut(col) {
                *c = value;
            }
        }
    }
}

#[async_trait]
impl GridDocument for InMemoryGrid {
    async fn dimensions(&self) -> Result<(usize, usize)> {
        let cells = self.cells.lock();
        let rows = cells.len();
        let cols = cells.first().map(|r| r.len()).unwrap_or(0);
        Ok((rows, cols))
    }

    async fn read_row(&self, row: usize) -> Result<Vec<GridValue>> {
        let cells = self.cells.lock();
        Ok(cells.get(row).cloned().unwrap_or_default())
    }

    async fn read_column(&self, col: usize) -> Result<Vec<GridValue>> {
        let cells = self.cells.lock();
        Ok(cells
            .iter()
            .map(|r| r.get(col).cloned().unwrap_or(GridValue::Blank))
            .collect())
    }

    async fn apply(&self, updates: &[CellUpdate]) -> Result<()> {
        let mut cells = self.cells.lock();
        for update in updates {
            if let Some(r) = cells.get_mut(update.row) {
                if let Some(c) = r.get_mut(update.col) {
                    *c = update.value.clone();
                }
            }
        }
        Ok(())
    }
}
