use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};
use tracing::info;

use crate::error::{Result, TimetableError};
use crate::schedule::SubjectAssignment;

/// Canonical upload columns, in template order
pub const CANONICAL_HEADERS: [&str; 6] = [
    "Class",
    "Subject Name",
    "Subject Code",
    "Teacher Name",
    "Teacher Initials",
    "Periods/Week",
];

const CLASS: usize = 0;
const SUBJECT_NAME: usize = 1;
const SUBJECT_CODE: usize = 2;
const TEACHER_NAME: usize = 3;
const TEACHER_INITIALS: usize = 4;
const PERIODS_PER_WEEK: usize = 5;

/// Localized column names accepted in place of the canonical ones
const HEADER_ALIASES: &[(&str, usize)] = &[
    ("Kelas", CLASS),
    ("Mata Pelajaran", SUBJECT_NAME),
    ("Init Subj", SUBJECT_CODE),
    ("Guru", TEACHER_NAME),
    ("Initial", TEACHER_INITIALS),
    ("Jam", PERIODS_PER_WEEK),
];

/// Subject rows plus the sorted list of distinct classes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MasterData {
    pub subjects: Vec<SubjectAssignment>,
    pub classes: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UploadOptions {
    /// Fill missing teacher initials from the teacher name
    pub derive_initials: bool,
}

/// Maps a header cell to its canonical column index
fn canonical_column(header: &str) -> Option<usize> {
    let header = header.trim();
    CANONICAL_HEADERS
        .iter()
        .position(|h| h.eq_ignore_ascii_case(header))
        .or_else(|| {
            HEADER_ALIASES
                .iter()
                .find(|(alias, _)| alias.eq_ignore_ascii_case(header))
                .map(|(_, col)| *col)
        })
}

/// Derives initials from a teacher name: first letter of the first name plus
/// the first two letters of the second, or the first three letters of a
/// single name, uppercased. Falls back to `???`.
pub fn derive_initials(teacher_name: &str) -> String {
    let parts: Vec<&str> = teacher_name.split_whitespace().collect();
    let initials: String = match parts.as_slice() {
        [first, second, ..] => first.chars().take(1).chain(second.chars().take(2)).collect(),
        [only] => only.chars().take(3).collect(),
        [] => String::new(),
    };
    if initials.is_empty() {
        "???".to_string()
    } else {
        initials.to_uppercase()
    }
}

/// Parses a weekly period quota; spreadsheet exports may write `4.0`
fn parse_quota(value: &str) -> Option<u32> {
    let value = value.trim();
    value.parse::<u32>().ok().or_else(|| {
        let float: f64 = value.parse().ok()?;
        if float.fract() == 0.0 && float >= 0.0 && float <= f64::from(u32::MAX) {
            Some(float as u32)
        } else {
            None
        }
    })
}

/// Loads subject assignments from CSV data.
///
/// The whole upload is rejected when a required column is missing, a
/// required field is empty or a quota is not a non-negative integer.
pub fn load_subjects<R: Read>(reader: R, options: UploadOptions) -> Result<MasterData> {
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    let mut columns: [Option<usize>; 6] = [None; 6];
    for (i, header) in headers.iter().enumerate() {
        if let Some(col) = canonical_column(header) {
            columns[col].get_or_insert(i);
        }
    }

    let missing: Vec<&str> = CANONICAL_HEADERS
        .iter()
        .enumerate()
        .filter(|(col, _)| columns[*col].is_none())
        .filter(|(col, _)| !(options.derive_initials && *col == TEACHER_INITIALS))
        .map(|(_, name)| *name)
        .collect();
    if !missing.is_empty() {
        return Err(TimetableError::MalformedUpload(format!(
            "missing required columns: {}",
            missing.join(", ")
        )));
    }

    let mut subjects = Vec::new();
    for (index, result) in reader.records().enumerate() {
        let record = result?;
        // header is line 1
        let line = index + 2;
        if record.iter().all(|field| field.is_empty()) {
            continue;
        }
        subjects.push(parse_row(&record, &columns, line, options)?);
    }

    if subjects.is_empty() {
        return Err(TimetableError::MalformedUpload(
            "upload contains no subject rows".to_string(),
        ));
    }

    let classes: Vec<String> = subjects
        .iter()
        .map(|s| s.class.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    info!(
        subjects = subjects.len(),
        classes = classes.len(),
        "loaded master data"
    );
    Ok(MasterData { subjects, classes })
}

fn field<'r>(record: &'r StringRecord, columns: &[Option<usize>; 6], col: usize) -> &'r str {
    columns[col].and_then(|i| record.get(i)).unwrap_or("")
}

fn required(
    record: &StringRecord,
    columns: &[Option<usize>; 6],
    col: usize,
    line: usize,
) -> Result<String> {
    let value = field(record, columns, col);
    if value.is_empty() {
        Err(TimetableError::MalformedUpload(format!(
            "line {}: {} is empty",
            line, CANONICAL_HEADERS[col]
        )))
    } else {
        Ok(value.to_string())
    }
}

fn parse_row(
    record: &StringRecord,
    columns: &[Option<usize>; 6],
    line: usize,
    options: UploadOptions,
) -> Result<SubjectAssignment> {
    let teacher_name = required(record, columns, TEACHER_NAME, line)?;
    let teacher_initials =
        if options.derive_initials && field(record, columns, TEACHER_INITIALS).is_empty() {
            derive_initials(&teacher_name)
        } else {
            required(record, columns, TEACHER_INITIALS, line)?
        };
    let quota = required(record, columns, PERIODS_PER_WEEK, line)?;
    let periods_per_week = parse_quota(&quota).ok_or_else(|| {
        TimetableError::MalformedUpload(format!(
            "line {}: Periods/Week must be a whole number, got {:?}",
            line, quota
        ))
    })?;

    Ok(SubjectAssignment {
        class: required(record, columns, CLASS, line)?,
        subject_name: required(record, columns, SUBJECT_NAME, line)?,
        subject_code: required(record, columns, SUBJECT_CODE, line)?,
        teacher_name,
        teacher_initials,
        periods_per_week,
    })
}

/// Loads subject assignments from a CSV file
pub fn load_subjects_from_path<P: AsRef<Path>>(
    csv_path: P,
    options: UploadOptions,
) -> Result<MasterData> {
    let file = std::fs::File::open(csv_path)?;
    load_subjects(file, options)
}
