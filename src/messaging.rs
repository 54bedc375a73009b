//! Messaging seam: the platform adapter surface the core depends on.
//!
//! Adapters translate platform events into [`InboundEvent`]s and deliver
//! plain-text replies. Nothing platform-specific crosses this boundary —
//! the core never sees raw platform payloads.

use crate::InboundEvent;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;

/// Stream of inbound chat events produced by a platform adapter.
pub type InboundStream = Pin<Box<dyn Stream<Item = InboundEvent> + Send>>;

/// Platform adapter surface.
pub trait Messaging: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Start the adapter and return its inbound event stream.
    fn start(&self) -> impl Future<Output = crate::Result<InboundStream>> + Send;

    /// Post a message, optionally inside a thread. Returns the posted
    /// message's own identifier, usable as a new thread root.
    fn post(
        &self,
        channel: &str,
        text: &str,
        thread: Option<&str>,
    ) -> impl Future<Output = crate::Result<String>> + Send;
}
