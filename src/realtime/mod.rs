//! Realtime chat relay: inbound event routing and room fan-out.
//!
//! - `events`: typed inbound events and payload validation
//! - `dispatcher`: one entry point per connection event
//! - `broadcaster`: delivery to room members, excluding the originator

mod broadcaster;
mod dispatcher;
pub mod events;

pub use broadcaster::{BroadcastTarget, Broadcaster, DeliveryResult};
pub use dispatcher::{
    DispatchOutcome, DispatcherStats, DispatcherStatsSnapshot, DropReason, EventDispatcher,
};
pub use events::{DisconnectReason, EventError, InboundEvent, NewMessage};
