//! Event fan-out to live subscribers

pub mod endpoint;
pub mod event;
pub mod service;
pub mod summary;
pub mod throttle;

pub use endpoint::{ChannelEndpoint, Endpoint, EndpointId};
pub use event::{EventFrame, EventKind, StreamEvent};
pub use service::{BroadcastService, BroadcastStats, DeliveryReport};
pub use summary::{summarize, ArchetypeBucket, ArchetypeSummary};
pub use throttle::{EventThrottle, ThrottleDecision};
