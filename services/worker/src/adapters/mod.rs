pub mod application;
pub mod db;
pub mod failure_log;
pub mod job_search;

pub use application::PgApplicationAdapter;
pub use db::PgStore;
pub use failure_log::{PgFailureLogger, TracingFailureLogger};
pub use job_search::PgJobSearchAdapter;
