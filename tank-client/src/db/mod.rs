pub mod readings;
pub mod terminals;
pub mod thresholds;

pub use thresholds::CooldownMarker;
