mod manager;

pub use manager::{Delivery, FanoutStatsSnapshot, RoomManager};
