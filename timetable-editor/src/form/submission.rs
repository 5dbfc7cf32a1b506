use serde::Deserialize;

use crate::error::{Result, TimetableError};
use crate::schedule::slot_utils::validate_time_config;
use crate::schedule::{parse_clock, BreakInsertion, TimeStructureConfig};

/// Time settings as submitted by the editing surface
#[derive(Debug, Clone, Deserialize)]
pub struct TimeStructureRequest {
    pub start_time: String,
    pub period_minutes: u32,
    pub total_periods: u32,
    #[serde(default)]
    pub breaks: Vec<BreakInsertion>,
}

/// A single cell edit
#[derive(Debug, Clone, Deserialize)]
pub struct CellEditRequest {
    pub period: String,
    pub class: String,
    pub value: Option<String>,
}

/// Every class cell of one day, row-major in period order
#[derive(Debug, Clone, Deserialize)]
pub struct GridReplaceRequest {
    pub cells: Vec<Vec<Option<String>>>,
}

/// Validates time settings before the time structure is built
pub fn validate_time_structure(req: &TimeStructureRequest) -> Result<TimeStructureConfig> {
    let start = parse_clock(&req.start_time).ok_or_else(|| {
        TimetableError::InvalidTimeConfig(format!(
            "start time must be HH:MM, got {:?}",
            req.start_time
        ))
    })?;

    let config = TimeStructureConfig {
        start,
        period_minutes: req.period_minutes,
        total_periods: req.total_periods,
        breaks: req.breaks.clone(),
    };
    validate_time_config(&config)?;
    Ok(config)
}
