use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::types::{SlotKind, TimeSlot, RECESS};
use crate::error::{Result, TimetableError};

/// One period row: label, derived time range and one cell per class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridRow {
    pub label: String,
    pub kind: SlotKind,
    pub time: String,
    pub cells: Vec<Option<String>>,
}

impl GridRow {
    /// Non-empty class cells paired with their class
    pub fn filled_cells<'a>(
        &'a self,
        classes: &'a [String],
    ) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        classes
            .iter()
            .zip(self.cells.iter())
            .filter_map(|(class, cell)| match cell.as_deref() {
                Some(value) if !value.trim().is_empty() => Some((class.as_str(), value)),
                _ => None,
            })
    }
}

/// Period × class matrix for one school day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleGrid {
    classes: Vec<String>,
    rows: Vec<GridRow>,
}

impl ScheduleGrid {
    /// Creates an empty grid with break rows pre-filled with `RECESS`
    pub fn new(slots: &[TimeSlot], classes: &[String]) -> Self {
        let rows = slots
            .iter()
            .map(|slot| {
                let fill = match slot.kind {
                    SlotKind::Break => Some(RECESS.to_string()),
                    SlotKind::Class => None,
                };
                GridRow {
                    label: slot.label.clone(),
                    kind: slot.kind,
                    time: slot.time_range(),
                    cells: vec![fill; classes.len()],
                }
            })
            .collect();
        ScheduleGrid {
            classes: classes.to_vec(),
            rows,
        }
    }

    /// Assembles a grid from rows read back from an exported sheet
    pub fn from_rows(classes: Vec<String>, rows: Vec<GridRow>) -> Self {
        ScheduleGrid { classes, rows }
    }

    /// Builds a grid for the given slots with every class cell replaced.
    ///
    /// `cells` is row-major in slot order; the `Time` column is always derived
    /// from the slots. Returns the reason when the matrix has the wrong shape.
    pub fn with_cells(
        slots: &[TimeSlot],
        classes: &[String],
        cells: Vec<Vec<Option<String>>>,
    ) -> std::result::Result<Self, String> {
        if cells.len() != slots.len() {
            return Err(format!(
                "expected {} period rows, got {}",
                slots.len(),
                cells.len()
            ));
        }
        let mut grid = ScheduleGrid::new(slots, classes);
        for (row, values) in grid.rows.iter_mut().zip(cells) {
            if values.len() != classes.len() {
                return Err(format!(
                    "row {} has {} cells, expected {}",
                    row.label,
                    values.len(),
                    classes.len()
                ));
            }
            row.cells = values.into_iter().map(normalize).collect();
        }
        Ok(grid)
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn rows(&self) -> &[GridRow] {
        &self.rows
    }

    pub fn row(&self, label: &str) -> Option<&GridRow> {
        self.rows.iter().find(|r| r.label == label)
    }

    pub fn cell(&self, label: &str, class: &str) -> Option<&str> {
        let col = self.class_index(class)?;
        self.row(label)?.cells.get(col)?.as_deref()
    }

    /// Stores a cell value as given; blank strings clear the cell
    pub fn set_cell(&mut self, label: &str, class: &str, value: Option<String>) -> Result<()> {
        let col = self
            .class_index(class)
            .ok_or_else(|| TimetableError::UnknownClass(class.to_string()))?;
        let row = self
            .rows
            .iter_mut()
            .find(|r| r.label == label)
            .ok_or_else(|| TimetableError::UnknownPeriod(label.to_string()))?;
        row.cells[col] = normalize(value);
        Ok(())
    }

    fn class_index(&self, class: &str) -> Option<usize> {
        self.classes.iter().position(|c| c == class)
    }

    /// Checks the grid still matches the current time structure and class list.
    ///
    /// Row labels must be unique and follow slot order, and every row must hold
    /// exactly one cell per class.
    pub fn check_shape(
        &self,
        slots: &[TimeSlot],
        classes: &[String],
    ) -> std::result::Result<(), String> {
        if self.classes != classes {
            return Err("class columns differ from the loaded class list".to_string());
        }
        self.check_rows()?;
        let labels = self.rows.iter().map(|r| r.label.as_str());
        if !labels.eq(slots.iter().map(|s| s.label.as_str())) {
            return Err("period rows differ from the time structure".to_string());
        }
        Ok(())
    }

    /// Row labels must be unique and every row must hold one cell per class
    pub fn check_rows(&self) -> std::result::Result<(), String> {
        let mut seen = HashSet::new();
        for row in &self.rows {
            if !seen.insert(row.label.as_str()) {
                return Err(format!("period label {} appears more than once", row.label));
            }
            if row.cells.len() != self.classes.len() {
                return Err(format!(
                    "row {} has {} cells for {} classes",
                    row.label,
                    row.cells.len(),
                    self.classes.len()
                ));
            }
        }
        Ok(())
    }
}

fn normalize(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Stored state of one day's grid
#[derive(Debug, Clone)]
pub enum GridSlot {
    Valid(ScheduleGrid),
    /// Grid data that could not be used; rebuilt on next read
    Corrupt(String),
}

impl GridSlot {
    pub fn as_valid_mut(&mut self) -> Option<&mut ScheduleGrid> {
        match self {
            GridSlot::Valid(grid) => Some(grid),
            GridSlot::Corrupt(_) => None,
        }
    }
}
