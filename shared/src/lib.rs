pub mod schema;
pub mod types;

pub use schema::TELEMETRY_SCHEMA;
pub use types::*;
