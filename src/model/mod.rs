//! Data model shared by every stage of the feed

mod card;
mod operation;
mod process;
mod user;

pub use card::{CardAction, LightCard, PublisherType, Severity};
pub use operation::{CardOperation, CardOperationType, ControlSignal, Frame};
pub use process::{
    AcknowledgmentAllowed, ConsideredAcknowledgedForUserWhen, Process, ProcessState,
    ResponseDefinition,
};
pub use user::{ComputedPerimeter, CurrentUser, Entity, EntityRole, Permission, Rights};
