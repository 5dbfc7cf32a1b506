use std::fmt;
use std::sync::OnceLock;

use chrono::NaiveTime;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Keyword pre-filled into every class column of a break row
pub const RECESS: &str = "RECESS";

/// Non-teaching labels offered in every class column
pub const RESERVED_KEYWORDS: &[&str] = &[
    "UPACARA",
    "ASSEMBLY",
    "CHAPEL",
    RECESS,
    "FLAG CEREMONY",
    "DEVOTION",
    "SCOUT",
    "EXERCISE",
];

/// A cell containing any of these never refers to a teacher
pub const SAFE_KEYWORDS: &[&str] = &[
    "UPACARA",
    "ASSEMBLY",
    "CHAPEL",
    "ISTIRAHAT",
    "BREAK",
    RECESS,
    "NO CLASS",
    "P5",
    "FLAG CEREMONY",
    "DEVOTION",
    "SCOUT",
    "EXERCISE",
];

const BREAK_LABEL_MARKERS: &[&str] = &["BREAK", RECESS, "ISTIRAHAT"];

/// One row of uploaded master data: a teacher teaching a subject to a class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectAssignment {
    pub class: String,
    pub subject_name: String,
    pub subject_code: String,
    pub teacher_name: String,
    pub teacher_initials: String,
    pub periods_per_week: u32,
}

impl SubjectAssignment {
    pub fn reference(&self) -> AssignmentRef {
        AssignmentRef {
            subject_code: self.subject_code.clone(),
            teacher_initials: self.teacher_initials.clone(),
        }
    }
}

/// Structured form of a `"<SubjectCode> (<TeacherInitials>)"` cell value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssignmentRef {
    pub subject_code: String,
    pub teacher_initials: String,
}

impl AssignmentRef {
    /// Parses a cell value. Only the first parenthesized token counts as the
    /// teacher; text before it is taken as the subject code.
    pub fn parse(cell: &str) -> Option<AssignmentRef> {
        let captures = reference_pattern().captures(cell)?;
        let whole = captures.get(0)?;
        let initials = captures.get(1)?.as_str().trim();
        if initials.is_empty() {
            return None;
        }
        Some(AssignmentRef {
            subject_code: cell[..whole.start()].trim().to_string(),
            teacher_initials: initials.to_string(),
        })
    }
}

impl fmt::Display for AssignmentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.subject_code, self.teacher_initials)
    }
}

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\((.*?)\)").expect("reference pattern is valid"))
}

/// Extracts the teacher initials referenced by a cell, if any
pub fn teacher_initials(cell: &str) -> Option<String> {
    AssignmentRef::parse(cell).map(|r| r.teacher_initials)
}

/// True when the text contains one of the safe-list keywords (case-insensitive)
pub fn is_safe_keyword(cell: &str) -> bool {
    let upper = cell.to_uppercase();
    SAFE_KEYWORDS.iter().any(|safe| upper.contains(safe))
}

/// True when a period label names a break row
pub fn is_break_label(label: &str) -> bool {
    let upper = label.to_uppercase();
    BREAK_LABEL_MARKERS.iter().any(|marker| upper.contains(marker))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotKind {
    Class,
    Break,
}

/// A class period or a break with its wall-clock range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub label: String,
    pub kind: SlotKind,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeSlot {
    /// Formats the slot as `HH:MM - HH:MM`
    pub fn time_range(&self) -> String {
        super::slot_utils::format_range(self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakInsertion {
    pub after_period: u32,
    pub duration_minutes: u32,
}

/// Daily time settings the time structure is built from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeStructureConfig {
    pub start: NaiveTime,
    pub period_minutes: u32,
    pub total_periods: u32,
    pub breaks: Vec<BreakInsertion>,
}
