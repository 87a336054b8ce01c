// Settings domain: persisted capture configuration.

pub mod store;
pub mod types;
