pub mod logging;
pub mod time;
pub mod types;

pub use types::{Channel, NakReason, OutboxState, RecordState};
