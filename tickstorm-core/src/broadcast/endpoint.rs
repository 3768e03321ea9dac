//! Subscriber endpoints

use super::event::EventFrame;
use crate::core::errors::SimError;
use tokio::sync::mpsc::{self, error::TrySendError};

pub type EndpointId = u64;

/// One live subscriber
///
/// `send` must not block: the tick thread delivers while holding the
/// simulation lock. An error removes the endpoint.
pub trait Endpoint: Send + Sync {
    fn id(&self) -> EndpointId;

    fn send(&self, frame: &EventFrame) -> Result<(), SimError>;

    fn is_open(&self) -> bool;
}

/// Endpoint backed by a bounded tokio channel
///
/// A full buffer counts as a failure, so a stalled reader is dropped
/// instead of stalling the stream.
pub struct ChannelEndpoint {
    id: EndpointId,
    tx: mpsc::Sender<EventFrame>,
}

impl ChannelEndpoint {
    pub fn new(id: EndpointId, buffer: usize) -> (Self, mpsc::Receiver<EventFrame>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { id, tx }, rx)
    }
}

impl Endpoint for ChannelEndpoint {
    fn id(&self) -> EndpointId {
        self.id
    }

    fn send(&self, frame: &EventFrame) -> Result<(), SimError> {
        self.tx.try_send(frame.clone()).map_err(|e| {
            let reason = match e {
                TrySendError::Full(_) => "subscriber buffer full",
                TrySendError::Closed(_) => "subscriber disconnected",
            };
            SimError::BroadcastDelivery {
                endpoint: self.id,
                reason: reason.to_string(),
            }
        })
    }

    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}
