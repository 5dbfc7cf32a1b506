use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use tracing::warn;

use super::grid::ScheduleGrid;
use super::types::{teacher_initials, SubjectAssignment};

/// How a teacher's placed periods compare to their weekly quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "periods", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadStatus {
    Complete,
    Under(u32),
    Over(u32),
}

impl LoadStatus {
    fn from_delta(delta: i64) -> Self {
        match delta {
            0 => LoadStatus::Complete,
            d if d > 0 => LoadStatus::Under(u32::try_from(d).unwrap_or(u32::MAX)),
            d => LoadStatus::Over(u32::try_from(d.unsigned_abs()).unwrap_or(u32::MAX)),
        }
    }
}

impl fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadStatus::Complete => write!(f, "COMPLETE"),
            LoadStatus::Under(n) => write!(f, "UNDER ({})", n),
            LoadStatus::Over(n) => write!(f, "OVER ({})", n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeacherLoadRecord {
    pub teacher_initials: String,
    pub teacher_name: String,
    pub target_periods: u32,
    pub placed_periods: u32,
    /// Target minus placed
    pub delta: i64,
    pub status: LoadStatus,
}

/// Initials found in the grids that no subject assignment declares
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanedReference {
    pub initials: String,
    pub placements: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkloadReport {
    pub records: Vec<TeacherLoadRecord>,
    pub orphaned: Vec<OrphanedReference>,
}

/// Compares every teacher's weekly quota with the periods placed across all grids.
///
/// Records follow the order in which teachers first appear in the master data.
/// Double-booked cells still count once per occupied cell.
pub fn reconcile_workload<'a, I>(subjects: &[SubjectAssignment], grids: I) -> WorkloadReport
where
    I: IntoIterator<Item = &'a ScheduleGrid>,
{
    let mut order: Vec<&str> = Vec::new();
    let mut targets: HashMap<&str, (&str, u32)> = HashMap::new();
    for subject in subjects {
        let initials = subject.teacher_initials.trim();
        let entry = targets.entry(initials).or_insert_with(|| {
            order.push(initials);
            (subject.teacher_name.as_str(), 0)
        });
        entry.1 = entry.1.saturating_add(subject.periods_per_week);
    }

    let mut placed: HashMap<String, u32> = HashMap::new();
    for grid in grids {
        for row in grid.rows() {
            for (_, value) in row.filled_cells(grid.classes()) {
                if let Some(initials) = teacher_initials(value) {
                    *placed.entry(initials).or_insert(0) += 1;
                }
            }
        }
    }

    let records = order
        .iter()
        .map(|initials| {
            let (name, target) = targets[initials];
            let placed_periods = placed.get(*initials).copied().unwrap_or(0);
            let delta = i64::from(target) - i64::from(placed_periods);
            TeacherLoadRecord {
                teacher_initials: initials.to_string(),
                teacher_name: name.to_string(),
                target_periods: target,
                placed_periods,
                delta,
                status: LoadStatus::from_delta(delta),
            }
        })
        .collect();

    let mut orphaned: Vec<OrphanedReference> = placed
        .into_iter()
        .filter(|(initials, _)| !targets.contains_key(initials.as_str()))
        .map(|(initials, placements)| OrphanedReference {
            initials,
            placements,
        })
        .collect();
    orphaned.sort_by(|a, b| a.initials.cmp(&b.initials));

    for orphan in &orphaned {
        warn!(
            initials = %orphan.initials,
            placements = orphan.placements,
            "grid references a teacher missing from the master data"
        );
    }

    WorkloadReport { records, orphaned }
}
