pub mod column;
pub mod csvline;
pub mod datafile;
pub mod error;
pub mod indexer;
pub mod series;
pub mod timeparse;
pub mod values;

pub use column::{parse_column, ParsedColumn};
pub use csvline::decode_line;
pub use datafile::{DataFile, IndexEntry, INDEX_STRIDE};
pub use error::CoreError;
pub use indexer::build_index;
pub use series::{extract_series, SeriesPayload, SeriesResponse};
pub use timeparse::{parse_time_or_millis, parse_time_value, TimeLayout};
pub use values::{parse_delimited_floats, parse_float_value, parse_truthy};
