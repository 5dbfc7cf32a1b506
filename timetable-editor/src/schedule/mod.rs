pub mod types;
pub mod slot_utils;
pub mod grid;
pub mod conflicts;
pub mod workload;

pub use types::{
    BreakInsertion, SlotKind, SubjectAssignment, TimeSlot, TimeStructureConfig, RECESS,
    RESERVED_KEYWORDS,
};
pub use slot_utils::{build_time_structure, parse_clock};
pub use grid::{GridRow, GridSlot, ScheduleGrid};
pub use conflicts::{find_conflicts, ConflictSet};
pub use workload::{reconcile_workload, LoadStatus, TeacherLoadRecord, WorkloadReport};
