pub mod postgres;

pub use postgres::ReadingSink;
