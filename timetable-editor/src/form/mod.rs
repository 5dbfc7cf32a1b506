pub mod submission;
pub mod export;

pub use submission::{
    validate_time_structure, CellEditRequest, GridReplaceRequest, TimeStructureRequest,
};
pub use export::{export_workbook, read_workbook_from_path, template_csv, write_template};
