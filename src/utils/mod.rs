mod logging;

pub use logging::{init_logging, spawn_event_logger};
