//! Card storage and snapshot publication

mod light_cards;
mod throttle;

pub use light_cards::{
    AckEvent, AckOperation, CardSnapshot, DeletedChildCard, LightCardStore, SelectedCardEvent,
};
pub use throttle::SnapshotThrottle;
