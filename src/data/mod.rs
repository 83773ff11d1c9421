//! On-disk data layout.
//!
//! ## Architecture
//!
//! - **Record Format**: every mutation is one [`LogRecord`], CRC32-checked
//! - **Data Files**: records are appended to numbered `.data` segments; the
//!   highest numbered segment is the only writable one
//! - **Auxiliary Files**: hint, merge-finished and sequence number files reuse
//!   the same record encoding

pub mod data_file;
pub mod log_record;

pub use data_file::{
    data_file_path, parse_data_file_name, DataFile, DATA_FILE_NAME_SUFFIX, HINT_FILE_NAME,
    MERGE_FINISHED_FILE_NAME, SEQ_NO_FILE_NAME,
};
pub use log_record::{LogRecord, LogRecordPos, LogRecordType};
