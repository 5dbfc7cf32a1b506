use chrono::{Duration, NaiveTime, Timelike};
use tracing::debug;

use super::types::{BreakInsertion, SlotKind, TimeSlot, TimeStructureConfig};
use crate::error::{Result, TimetableError};

/// Allowed break length in minutes
pub const BREAK_MINUTES: std::ops::RangeInclusive<u32> = 5..=60;

const MINUTES_PER_DAY: u64 = 24 * 60;

/// Parses a wall-clock string (`HH:MM` or `HH:MM:SS`)
pub fn parse_clock(time_str: &str) -> Option<NaiveTime> {
    let trimmed = time_str.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .ok()
}

/// Formats a wall-clock time as `HH:MM`
pub fn format_clock(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

/// Formats a range as `HH:MM - HH:MM`
pub fn format_range(start: NaiveTime, end: NaiveTime) -> String {
    format!("{} - {}", format_clock(start), format_clock(end))
}

/// Checks the settings before any slot is built
pub fn validate_time_config(config: &TimeStructureConfig) -> Result<()> {
    if config.period_minutes == 0 {
        return Err(TimetableError::InvalidTimeConfig(
            "period duration must be greater than zero".to_string(),
        ));
    }
    if config.total_periods == 0 {
        return Err(TimetableError::InvalidTimeConfig(
            "total periods must be at least 1".to_string(),
        ));
    }

    for (i, b) in config.breaks.iter().enumerate() {
        if b.after_period < 1 || b.after_period > config.total_periods {
            return Err(TimetableError::InvalidTimeConfig(format!(
                "break {} must come after a period between 1 and {}, got {}",
                i + 1,
                config.total_periods,
                b.after_period
            )));
        }
        if !BREAK_MINUTES.contains(&b.duration_minutes) {
            return Err(TimetableError::InvalidTimeConfig(format!(
                "break {} must last between {} and {} minutes, got {}",
                i + 1,
                BREAK_MINUTES.start(),
                BREAK_MINUTES.end(),
                b.duration_minutes
            )));
        }
    }

    let start_minutes = u64::from(config.start.num_seconds_from_midnight() / 60);
    let day_minutes = u64::from(config.period_minutes) * u64::from(config.total_periods)
        + config
            .breaks
            .iter()
            .map(|b| u64::from(b.duration_minutes))
            .sum::<u64>();
    if start_minutes + day_minutes >= MINUTES_PER_DAY {
        return Err(TimetableError::InvalidTimeConfig(format!(
            "school day starting at {} lasting {} minutes runs past midnight",
            format_clock(config.start),
            day_minutes
        )));
    }

    Ok(())
}

/// Builds the ordered list of class periods and breaks for one school day.
///
/// Breaks are sorted by the period they follow. The sort is stable, so two
/// breaks after the same period are emitted in the order they were given.
/// Break labels are numbered in chronological order (`BREAK 1`, `BREAK 2`, ...).
pub fn build_time_structure(config: &TimeStructureConfig) -> Result<Vec<TimeSlot>> {
    validate_time_config(config)?;

    let mut breaks: Vec<&BreakInsertion> = config.breaks.iter().collect();
    breaks.sort_by_key(|b| b.after_period);
    let mut pending = breaks.into_iter().peekable();

    let mut slots = Vec::with_capacity(config.total_periods as usize + config.breaks.len());
    let mut cursor = config.start;
    let mut break_counter = 1;

    for period in 1..=config.total_periods {
        let end = cursor + Duration::minutes(i64::from(config.period_minutes));
        slots.push(TimeSlot {
            label: period.to_string(),
            kind: SlotKind::Class,
            start: cursor,
            end,
        });
        cursor = end;

        while let Some(b) = pending.next_if(|b| b.after_period == period) {
            let end = cursor + Duration::minutes(i64::from(b.duration_minutes));
            slots.push(TimeSlot {
                label: format!("BREAK {}", break_counter),
                kind: SlotKind::Break,
                start: cursor,
                end,
            });
            cursor = end;
            break_counter += 1;
        }
    }

    debug!(
        slots = slots.len(),
        breaks = break_counter - 1,
        "built time structure"
    );
    Ok(slots)
}
