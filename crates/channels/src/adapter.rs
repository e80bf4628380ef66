use std::sync::{Arc, Weak};

use {anyhow::Result, async_trait::async_trait, kindle_common::Reply};

use crate::event::{MessageEvent, ReplyTarget};

/// Binding to one chat platform. Each platform implements this.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Adapter identifier (e.g. "console", "telegram").
    fn name(&self) -> &str;

    /// Attach the adapter to the kernel's inbound sink. Called once, before
    /// [`Adapter::start`].
    ///
    /// The sink is held weakly: the kernel owns its adapters, not the other
    /// way around.
    fn mount(&self, sink: Weak<dyn InboundSink>);

    /// Begin receiving events.
    async fn start(&self) -> Result<()>;

    /// Stop receiving events. No-op by default.
    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

/// Handle to one logged-in bot account on an adapter.
#[async_trait]
pub trait Bot: Send + Sync {
    /// Platform id of the bot account.
    fn self_id(&self) -> &str;

    /// Deliver a reply to a conversation.
    async fn send(&self, target: &ReplyTarget, reply: &Reply) -> Result<()>;
}

/// Receiver of inbound events; the kernel provides the concrete implementation.
#[async_trait]
pub trait InboundSink: Send + Sync {
    /// Hand one inbound event to the kernel. Returns once the event's
    /// middleware chain has finished and any reply was sent.
    async fn dispatch(&self, adapter: &str, bot: Arc<dyn Bot>, event: MessageEvent);
}
