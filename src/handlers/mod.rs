//! API handlers

pub mod events;
pub mod features;
pub mod health;
pub mod scores;

pub use events::ingest_event;
pub use features::get_features;
pub use health::health_check;
pub use scores::*;
