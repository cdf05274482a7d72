//! Point-in-time data access

pub mod csv_store;
pub mod memory;
pub mod provider;
pub mod retry;

pub use csv_store::CsvStore;
pub use memory::InMemoryStore;
pub use provider::{
    ensure_point_in_time, latest_fresh, DataAccess, DataError, Observation, BAR_FIELDS,
};
pub use retry::{RetryPolicy, RetryingAccess};
