//! Outbound message model and transport/interaction ports.

pub mod dispatcher;
pub mod interactions;
pub mod message;

pub use dispatcher::{
    noop_dispatcher, recording_dispatcher, LoggingDispatcher, NoopDispatcher,
    RecordingDispatcher, TransportDispatcher,
};
pub use interactions::{InMemoryInteractions, InteractionLog, NoInteractions};
pub use message::{MessageRecipient, OutboundMessage};
