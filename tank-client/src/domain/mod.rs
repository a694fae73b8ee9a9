pub mod reading;
pub mod terminal;
pub mod threshold_config;

pub use reading::{Reading, ReadingPoint, StoredReading};
pub use terminal::{parse_capacity_liters, TerminalInfo};
pub use threshold_config::ThresholdConfig;
