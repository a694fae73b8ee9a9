pub mod reading_csv_file;
pub mod telemetry_poller;

pub use reading_csv_file::ReadingCsvFileSource;
pub use telemetry_poller::TelemetryPollerSource;
