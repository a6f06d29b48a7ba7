pub mod artifact;
pub mod cases;
pub mod compiler;
pub mod config;
pub mod error;
pub mod events;
pub mod judge;
pub mod language;

pub use error::{Error, Result};

pub fn create_timestamp() -> String {
    use chrono::{SecondsFormat, Utc};
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
