use std::collections::HashMap;
use std::str::FromStr;

use chrono::Weekday;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{Result, TimetableError};
use crate::parser::MasterData;
use crate::schedule::{
    build_time_structure, find_conflicts, reconcile_workload, ConflictSet, GridSlot,
    ScheduleGrid, SubjectAssignment, TimeSlot, TimeStructureConfig, WorkloadReport,
    RESERVED_KEYWORDS,
};

/// Days a timetable is built for, in display order
pub const SCHOOL_DAYS: [Weekday; 5] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
];

pub fn day_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Parses a school day name such as `monday` or `Mon`
pub fn parse_school_day(name: &str) -> Result<Weekday> {
    Weekday::from_str(name.trim())
        .ok()
        .filter(|day| SCHOOL_DAYS.contains(day))
        .ok_or_else(|| TimetableError::UnknownDay(name.to_string()))
}

/// Non-fatal problems the user should be told about
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionWarning {
    /// A day's grid was unusable and has been rebuilt empty
    GridReset { day: String, reason: String },
    OrphanedTeacher { initials: String, placements: u32 },
}

/// All state of one user's editing session
#[derive(Debug, Default)]
pub struct Session {
    subjects: Vec<SubjectAssignment>,
    classes: Vec<String>,
    time_structure: Vec<TimeSlot>,
    grids: HashMap<Weekday, GridSlot>,
    warnings: Vec<SessionWarning>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn time_structure(&self) -> &[TimeSlot] {
        &self.time_structure
    }

    /// Replaces the master data. Grids are kept unless the class list changed.
    pub fn load_master_data(&mut self, data: MasterData) {
        if data.classes != self.classes && !self.grids.is_empty() {
            info!("class list changed, resetting schedule grids");
            self.grids.clear();
        }
        self.subjects = data.subjects;
        self.classes = data.classes;
    }

    /// Builds a new time structure and discards every existing grid
    pub fn apply_time_structure(&mut self, config: &TimeStructureConfig) -> Result<&[TimeSlot]> {
        let slots = build_time_structure(config)?;
        info!(slots = slots.len(), "time structure saved, grids reset");
        self.time_structure = slots;
        self.grids.clear();
        Ok(&self.time_structure)
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.subjects.is_empty() {
            return Err(TimetableError::NotReady("no school data has been uploaded"));
        }
        if self.time_structure.is_empty() {
            return Err(TimetableError::NotReady("no time structure has been saved"));
        }
        Ok(())
    }

    /// Returns the grid for a day, creating it on first access.
    ///
    /// A stored grid that is corrupt or no longer matches the time structure
    /// is discarded and rebuilt; a [`SessionWarning::GridReset`] is queued.
    pub fn grid(&mut self, day: Weekday) -> Result<&ScheduleGrid> {
        self.grid_mut(day).map(|grid| &*grid)
    }

    fn grid_mut(&mut self, day: Weekday) -> Result<&mut ScheduleGrid> {
        self.ensure_ready()?;

        let problem = match self.grids.get(&day) {
            None => None,
            Some(GridSlot::Corrupt(reason)) => Some(reason.clone()),
            Some(GridSlot::Valid(grid)) => grid
                .check_shape(&self.time_structure, &self.classes)
                .err(),
        };
        if let Some(reason) = problem {
            warn!(day = day_name(day), %reason, "discarding corrupt grid");
            self.warnings.push(SessionWarning::GridReset {
                day: day_name(day).to_string(),
                reason,
            });
            self.grids.remove(&day);
        }

        self.grids
            .entry(day)
            .or_insert_with(|| {
                GridSlot::Valid(ScheduleGrid::new(&self.time_structure, &self.classes))
            })
            .as_valid_mut()
            .ok_or(TimetableError::NotReady("grid could not be rebuilt"))
    }

    /// Stores one cell value for a day
    pub fn set_cell(
        &mut self,
        day: Weekday,
        period: &str,
        class: &str,
        value: Option<String>,
    ) -> Result<()> {
        self.grid_mut(day)?.set_cell(period, class, value)
    }

    /// Replaces all class cells of a day at once.
    ///
    /// A matrix that does not fit the day's rows and classes is kept as a
    /// corrupt grid and recovered on the next read.
    pub fn replace_grid(&mut self, day: Weekday, cells: Vec<Vec<Option<String>>>) -> Result<()> {
        self.ensure_ready()?;
        let slot = match ScheduleGrid::with_cells(&self.time_structure, &self.classes, cells) {
            Ok(grid) => GridSlot::Valid(grid),
            Err(reason) => {
                warn!(day = day_name(day), %reason, "received malformed grid");
                GridSlot::Corrupt(reason)
            }
        };
        self.grids.insert(day, slot);
        Ok(())
    }

    /// Double-booked cells of a day, recomputed on every call
    pub fn conflicts(&mut self, day: Weekday) -> Result<ConflictSet> {
        Ok(find_conflicts(self.grid(day)?))
    }

    /// Teacher workload over every day that has a grid
    pub fn workload(&mut self) -> Result<WorkloadReport> {
        self.ensure_ready()?;
        let stored: Vec<Weekday> = SCHOOL_DAYS
            .into_iter()
            .filter(|day| self.grids.contains_key(day))
            .collect();
        for day in stored {
            self.grid(day)?;
        }

        let grids = SCHOOL_DAYS
            .iter()
            .filter_map(|day| match self.grids.get(day) {
                Some(GridSlot::Valid(grid)) => Some(grid),
                _ => None,
            });
        Ok(reconcile_workload(&self.subjects, grids))
    }

    /// Grids for every school day in order, creating missing ones
    pub fn all_grids(&mut self) -> Result<Vec<(Weekday, ScheduleGrid)>> {
        SCHOOL_DAYS
            .into_iter()
            .map(|day| Ok((day, self.grid(day)?.clone())))
            .collect()
    }

    /// Values the editing surface may offer for a class column: empty,
    /// the reserved keywords, then one reference per subject of that class
    pub fn cell_options(&self, class: &str) -> Result<Vec<Option<String>>> {
        if !self.classes.iter().any(|c| c == class) {
            return Err(TimetableError::UnknownClass(class.to_string()));
        }
        let mut options: Vec<Option<String>> = vec![None];
        options.extend(RESERVED_KEYWORDS.iter().map(|k| Some(k.to_string())));
        options.extend(
            self.subjects
                .iter()
                .filter(|s| s.class == class)
                .map(|s| Some(s.reference().to_string())),
        );
        Ok(options)
    }

    /// Drains warnings queued since the last call
    pub fn take_warnings(&mut self) -> Vec<SessionWarning> {
        std::mem::take(&mut self.warnings)
    }
}

/// Warnings for references to teachers missing from the master data
pub fn orphan_warnings(report: &WorkloadReport) -> Vec<SessionWarning> {
    report
        .orphaned
        .iter()
        .map(|o| SessionWarning::OrphanedTeacher {
            initials: o.initials.clone(),
            placements: o.placements,
        })
        .collect()
}
