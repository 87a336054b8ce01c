// Capture domain: session lifecycle, driver callback sink, frame hand-off.

pub mod exchange;
pub mod session;
pub mod sink;
