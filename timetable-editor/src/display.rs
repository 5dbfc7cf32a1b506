use std::fmt::Write;

use crate::schedule::{ConflictSet, ScheduleGrid, WorkloadReport};

const EMPTY_CELL: &str = "[EMPTY]";
const CONFLICT_MARK: &str = " !!";

/// Formats a cell for plain-text output, marking double-bookings
pub fn format_cell(value: Option<&str>, conflicting: bool) -> String {
    let text = value.unwrap_or(EMPTY_CELL);
    if conflicting {
        format!("{}{}", text, CONFLICT_MARK)
    } else {
        text.to_string()
    }
}

/// Renders one day as an aligned text table: period, time, then one column per class
pub fn render_day_grid(day_name: &str, grid: &ScheduleGrid, conflicts: &ConflictSet) -> String {
    let mut header = vec!["Period".to_string(), "Time".to_string()];
    header.extend(grid.classes().iter().cloned());

    let mut table = vec![header];
    for row in grid.rows() {
        let mut line = vec![row.label.clone(), row.time.clone()];
        for (class, cell) in grid.classes().iter().zip(&row.cells) {
            let conflicting = conflicts.contains(&(row.label.clone(), class.clone()));
            line.push(format_cell(cell.as_deref(), conflicting));
        }
        table.push(line);
    }

    let widths: Vec<usize> = (0..table[0].len())
        .map(|col| {
            table
                .iter()
                .filter_map(|line| line.get(col))
                .map(|cell| cell.chars().count())
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut out = String::new();
    let _ = writeln!(out, "** {} **", day_name);
    for line in &table {
        let padded: Vec<String> = line
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
            .collect();
        let _ = writeln!(out, "{}", padded.join(" | ").trim_end());
    }
    if !conflicts.is_empty() {
        let _ = writeln!(out, "{} double-booked cell(s)", conflicts.len());
    }
    out
}

/// Renders the teacher workload summary
pub fn render_workload(report: &WorkloadReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "** Teacher workload **");
    for record in &report.records {
        let _ = writeln!(
            out,
            "{} {} -> {}/{} {}",
            record.teacher_initials,
            record.teacher_name,
            record.placed_periods,
            record.target_periods,
            record.status
        );
    }
    if !report.orphaned.is_empty() {
        let _ = writeln!(out, "⚠️  Teachers missing from the school data:");
        for orphan in &report.orphaned {
            let _ = writeln!(out, "  - ({}) placed {} time(s)", orphan.initials, orphan.placements);
        }
    }
    out
}

/// Prints a day grid to stdout
pub fn print_day_grid(day_name: &str, grid: &ScheduleGrid, conflicts: &ConflictSet) {
    println!("\n{}", render_day_grid(day_name, grid, conflicts));
}

/// Prints the workload summary to stdout
pub fn print_workload(report: &WorkloadReport) {
    println!("\n{}", render_workload(report));
}
