use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;

use chrono::Weekday;
use csv::{ReaderBuilder, Writer, WriterBuilder};
use tracing::{debug, info, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Result, TimetableError};
use crate::parser::CANONICAL_HEADERS;
use crate::schedule::types::is_break_label;
use crate::schedule::{GridRow, ScheduleGrid, SlotKind, WorkloadReport};
use crate::session::{day_name, parse_school_day, SCHOOL_DAYS};

pub const WORKLOAD_SHEET: &str = "Workload.csv";

const PERIOD_HEADER: &str = "Period";
const TIME_HEADER: &str = "Time";

const SAMPLE_ROW: [&str; 6] = ["Kelas 1", "Matematika", "MAT", "Budi Santoso", "BDS", "4"];

fn finish(wtr: Writer<Vec<u8>>) -> Result<Vec<u8>> {
    wtr.into_inner()
        .map_err(|e| TimetableError::Io(e.into_error()))
}

/// Blank master-data sheet with the expected headers.
///
/// One placeholder row is written per class tier, or a single sample row
/// when no tiers are given.
pub fn template_csv(class_tiers: &[String]) -> Result<Vec<u8>> {
    let mut wtr = WriterBuilder::new().from_writer(Vec::new());
    wtr.write_record(CANONICAL_HEADERS)?;
    if class_tiers.is_empty() {
        wtr.write_record(SAMPLE_ROW)?;
    }
    for tier in class_tiers {
        let mut row: [&str; 6] = SAMPLE_ROW;
        row[0] = tier.as_str();
        wtr.write_record(row)?;
    }
    finish(wtr)
}

/// Writes the template sheet to a file
pub fn write_template<P: AsRef<Path>>(path: P, class_tiers: &[String]) -> Result<()> {
    std::fs::write(path, template_csv(class_tiers)?)?;
    Ok(())
}

/// One day as CSV: `Period,Time,<classes...>` with rows in period order
pub fn day_sheet_csv(grid: &ScheduleGrid) -> Result<Vec<u8>> {
    let mut wtr = WriterBuilder::new().from_writer(Vec::new());
    let header = [PERIOD_HEADER, TIME_HEADER]
        .into_iter()
        .chain(grid.classes().iter().map(String::as_str));
    wtr.write_record(header)?;

    for row in grid.rows() {
        let record = [row.label.as_str(), row.time.as_str()]
            .into_iter()
            .chain(row.cells.iter().map(|c| c.as_deref().unwrap_or("")));
        wtr.write_record(record)?;
    }
    finish(wtr)
}

fn workload_csv(report: &WorkloadReport) -> Result<Vec<u8>> {
    let mut wtr = WriterBuilder::new().from_writer(Vec::new());
    wtr.write_record([
        "Teacher Initials",
        "Teacher Name",
        "Target",
        "Placed",
        "Delta",
        "Status",
    ])?;
    for record in &report.records {
        wtr.write_record([
            record.teacher_initials.clone(),
            record.teacher_name.clone(),
            record.target_periods.to_string(),
            record.placed_periods.to_string(),
            record.delta.to_string(),
            record.status.to_string(),
        ])?;
    }
    finish(wtr)
}

/// Packs one sheet per day plus the workload summary into a zip archive
pub fn export_workbook(grids: &[(Weekday, ScheduleGrid)], report: &WorkloadReport) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for (day, grid) in grids {
        zip.start_file(format!("{}.csv", day_name(*day)), opts)?;
        zip.write_all(&day_sheet_csv(grid)?)?;
    }
    zip.start_file(WORKLOAD_SHEET, opts)?;
    zip.write_all(&workload_csv(report)?)?;

    let bytes = zip.finish()?.into_inner();
    info!(days = grids.len(), bytes = bytes.len(), "exported workbook");
    Ok(bytes)
}

/// Reads the day sheets of an exported workbook back into grids.
///
/// Entries that are not named after a school day are ignored, as is any
/// later sheet for a day that was already read.
pub fn read_workbook<R: Read + Seek>(reader: R) -> Result<Vec<(Weekday, ScheduleGrid)>> {
    let mut archive = ZipArchive::new(reader)?;
    let mut days: Vec<(Weekday, ScheduleGrid)> = Vec::new();

    for i in 0..archive.len() {
        let file = archive.by_index(i)?;
        let name = file.name().to_string();
        let stem = name.strip_suffix(".csv").unwrap_or(&name);
        match parse_school_day(stem) {
            Ok(day) if days.iter().any(|(seen, _)| *seen == day) => {
                warn!(entry = %name, day = day_name(day), "skipping second sheet for the same day");
            }
            Ok(day) => {
                let grid = read_day_sheet(file).map_err(|e| match e {
                    TimetableError::MalformedUpload(msg) => {
                        TimetableError::MalformedUpload(format!("{}: {}", name, msg))
                    }
                    other => other,
                })?;
                days.push((day, grid));
            }
            Err(_) => debug!(entry = %name, "skipping workbook entry"),
        }
    }

    days.sort_by_key(|(day, _)| SCHOOL_DAYS.iter().position(|d| d == day));
    Ok(days)
}

/// Reads a workbook archive from disk
pub fn read_workbook_from_path<P: AsRef<Path>>(path: P) -> Result<Vec<(Weekday, ScheduleGrid)>> {
    read_workbook(std::fs::File::open(path)?)
}

fn read_day_sheet<R: Read>(reader: R) -> Result<ScheduleGrid> {
    let mut reader = ReaderBuilder::new().from_reader(reader);
    let headers = reader.headers()?.clone();
    if headers.get(0) != Some(PERIOD_HEADER) || headers.get(1) != Some(TIME_HEADER) {
        return Err(TimetableError::MalformedUpload(format!(
            "sheet must start with {} and {} columns",
            PERIOD_HEADER, TIME_HEADER
        )));
    }
    let classes: Vec<String> = headers.iter().skip(2).map(str::to_string).collect();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        let label = record.get(0).unwrap_or("").to_string();
        let kind = if is_break_label(&label) {
            SlotKind::Break
        } else {
            SlotKind::Class
        };
        rows.push(GridRow {
            label,
            kind,
            time: record.get(1).unwrap_or("").to_string(),
            cells: record
                .iter()
                .skip(2)
                .map(|c| Some(c.to_string()).filter(|c| !c.trim().is_empty()))
                .collect(),
        });
    }
    let grid = ScheduleGrid::from_rows(classes, rows);
    grid.check_rows().map_err(TimetableError::MalformedUpload)?;
    Ok(grid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{
        build_time_structure, find_conflicts, parse_clock, reconcile_workload, BreakInsertion,
        SubjectAssignment, TimeStructureConfig,
    };
    use pretty_assertions::assert_eq;

    fn grid() -> ScheduleGrid {
        let slots = build_time_structure(&TimeStructureConfig {
            start: parse_clock("07:00").unwrap(),
            period_minutes: 35,
            total_periods: 4,
            breaks: vec![BreakInsertion {
                after_period: 2,
                duration_minutes: 15,
            }],
        })
        .unwrap();
        let mut grid = ScheduleGrid::new(&slots, &["7A".to_string(), "7B".to_string()]);
        grid.set_cell("1", "7A", Some("MAT (BDS)".to_string())).unwrap();
        grid.set_cell("1", "7B", Some("IPA, lab (BDS)".to_string())).unwrap();
        grid
    }

    fn subjects() -> Vec<SubjectAssignment> {
        vec![SubjectAssignment {
            class: "7A".to_string(),
            subject_name: "Matematika".to_string(),
            subject_code: "MAT".to_string(),
            teacher_name: "Budi Santoso".to_string(),
            teacher_initials: "BDS".to_string(),
            periods_per_week: 4,
        }]
    }

    #[test]
    fn template_has_canonical_headers() {
        let csv = String::from_utf8(template_csv(&[]).unwrap()).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some(CANONICAL_HEADERS.join(",").as_str()));
        assert_eq!(lines.next(), Some("Kelas 1,Matematika,MAT,Budi Santoso,BDS,4"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn template_writes_one_row_per_tier() {
        let tiers = vec!["Kelas 7".to_string(), "Kelas 8".to_string()];
        let csv = String::from_utf8(template_csv(&tiers).unwrap()).unwrap();
        let firsts: Vec<&str> = csv
            .lines()
            .skip(1)
            .map(|l| l.split(',').next().unwrap())
            .collect();
        assert_eq!(firsts, vec!["Kelas 7", "Kelas 8"]);
    }

    #[test]
    fn template_is_accepted_by_the_upload_parser() {
        let bytes = template_csv(&[]).unwrap();
        let data = crate::parser::load_subjects(bytes.as_slice(), Default::default()).unwrap();
        assert_eq!(data.subjects[0].teacher_initials, "BDS");
    }

    #[test]
    fn day_sheet_lists_rows_in_period_order() {
        let csv = String::from_utf8(day_sheet_csv(&grid()).unwrap()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Period,Time,7A,7B",
                "1,07:00 - 07:35,MAT (BDS),\"IPA, lab (BDS)\"",
                "2,07:35 - 08:10,,",
                "BREAK 1,08:10 - 08:25,RECESS,RECESS",
                "3,08:25 - 09:00,,",
                "4,09:00 - 09:35,,",
            ]
        );
    }

    #[test]
    fn exported_workbook_reads_back_with_same_conflicts() {
        let grid = grid();
        let report = reconcile_workload(&subjects(), [&grid]);
        let grids = vec![(Weekday::Tue, grid.clone()), (Weekday::Mon, grid.clone())];
        let bytes = export_workbook(&grids, &report).unwrap();

        let restored = read_workbook(Cursor::new(bytes)).unwrap();
        let days: Vec<Weekday> = restored.iter().map(|(d, _)| *d).collect();
        assert_eq!(days, vec![Weekday::Mon, Weekday::Tue]);
        assert_eq!(restored[0].1, grid);
        assert_eq!(find_conflicts(&restored[1].1), find_conflicts(&grid));
    }

    #[test]
    fn workbook_contains_workload_sheet() {
        let grid = grid();
        let report = reconcile_workload(&subjects(), [&grid]);
        let bytes = export_workbook(&[(Weekday::Mon, grid)], &report).unwrap();

        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut sheet = String::new();
        archive
            .by_name(WORKLOAD_SHEET)
            .unwrap()
            .read_to_string(&mut sheet)
            .unwrap();
        assert_eq!(
            sheet.lines().collect::<Vec<_>>(),
            vec![
                "Teacher Initials,Teacher Name,Target,Placed,Delta,Status",
                "BDS,Budi Santoso,4,2,2,UNDER (2)",
            ]
        );
    }

    fn archive(sheets: &[(&str, &str)]) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in sheets {
            zip.start_file(*name, FileOptions::default()).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn rejects_sheet_with_repeated_period_label() {
        let bytes = archive(&[(
            "Monday.csv",
            "Period,Time,7A,7B\n\
             1,07:00 - 07:35,MAT (BDS),IPA (BDS)\n\
             1,07:35 - 08:10,ENG (SRI),\n",
        )]);
        let err = read_workbook(Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, TimetableError::MalformedUpload(_)), "{err}");
        assert!(err.to_string().contains("Monday.csv"), "{err}");
        assert!(err.to_string().contains("period label 1 appears more than once"), "{err}");
    }

    #[test]
    fn keeps_first_sheet_per_day() {
        let bytes = archive(&[
            ("Mon.csv", "Period,Time,7A\n1,07:00 - 07:35,MAT (BDS)\n"),
            ("Monday.csv", "Period,Time,7A\n1,07:00 - 07:35,ENG (SRI)\n"),
            ("Tue.csv", "Period,Time,7A\n1,07:00 - 07:35,\n"),
        ]);
        let days = read_workbook(Cursor::new(bytes)).unwrap();
        let names: Vec<Weekday> = days.iter().map(|(d, _)| *d).collect();
        assert_eq!(names, vec![Weekday::Mon, Weekday::Tue]);
        assert_eq!(days[0].1.cell("1", "7A"), Some("MAT (BDS)"));

        let report = reconcile_workload(&subjects(), days.iter().map(|(_, g)| g));
        assert_eq!(report.records[0].placed_periods, 1);
    }

    #[test]
    fn rejects_sheet_without_period_column() {
        let bytes = archive(&[("Monday.csv", "Jam,7A\n1,MAT (BDS)\n")]);

        let err = read_workbook(Cursor::new(bytes)).unwrap_err();
        assert!(err.to_string().contains("Monday.csv"), "{err}");
    }
}
