// Device domain: driver abstraction, enumeration, and display modes.

pub mod api;
pub mod catalog;
pub mod error;
pub(crate) mod guard;
pub mod mock;
pub mod modes;
pub mod types;
