pub mod model;
pub mod tracker;

pub use model::{Health, HeartbeatEntry, Registration};
pub use tracker::HeartbeatTracker;
