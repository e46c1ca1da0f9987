pub mod reading;
pub mod value;

pub use reading::{AggregateId, AggregateResult, Reading, ReadingId, Status};
pub use value::{parse_reading_payload, parse_reading_str, parse_reading_value, ValueError};
