use std::collections::{BTreeSet, HashMap};

use super::grid::{GridRow, ScheduleGrid};
use super::types::{is_break_label, is_safe_keyword, teacher_initials, RECESS};

/// (period label, class) coordinates of double-booked cells
pub type ConflictSet = BTreeSet<(String, String)>;

/// Finds every cell whose teacher is also booked in another class during the same period.
///
/// Rows are independent: no state is carried across periods or days.
pub fn find_conflicts(grid: &ScheduleGrid) -> ConflictSet {
    let classes = grid.classes();
    let mut conflicts = ConflictSet::new();

    for row in grid.rows() {
        if is_recess_row(row) {
            continue;
        }

        let mut teacher_map: HashMap<String, Vec<&str>> = HashMap::new();
        for (class, value) in row.filled_cells(classes) {
            if is_safe_keyword(value) {
                continue;
            }
            if let Some(initials) = teacher_initials(value) {
                teacher_map.entry(initials).or_default().push(class);
            }
        }

        for booked in teacher_map.values().filter(|cols| cols.len() > 1) {
            for class in booked {
                conflicts.insert((row.label.clone(), class.to_string()));
            }
        }
    }

    conflicts
}

fn is_recess_row(row: &GridRow) -> bool {
    is_break_label(&row.label)
        || row.cells.iter().all(|cell| {
            cell.as_deref()
                .is_some_and(|v| v.trim().eq_ignore_ascii_case(RECESS))
        })
}
