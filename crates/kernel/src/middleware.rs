//! Onion-style middleware chain.
//!
//! A chain is composed per inbound event from the kernel's global middlewares
//! followed by every active plugin's middlewares. Each middleware gets a
//! [`Next`] for the rest of the chain and either answers (`Some(reply)`),
//! declines (`None`), or defers by awaiting `next.run(ctx)`.

use std::{
    fmt,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use {
    anyhow::Result,
    async_trait::async_trait,
    futures::future::BoxFuture,
    kindle_channels::{Bot, MessageEvent},
    kindle_common::Reply,
    tracing::warn,
};

use crate::kernel::Kernel;

/// Handle returned by [`Kernel::middleware`], used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MiddlewareId(pub(crate) u64);

/// Everything a middleware can see about one inbound event.
pub struct MessageContext {
    pub kernel: Arc<Kernel>,
    /// Name of the adapter the event arrived on.
    pub adapter: String,
    pub bot: Arc<dyn Bot>,
    pub event: MessageEvent,
}

impl fmt::Debug for MessageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageContext")
            .field("adapter", &self.adapter)
            .field("bot", &self.bot.self_id())
            .field("event", &self.event)
            .finish()
    }
}

#[async_trait]
pub trait Middleware: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        "anonymous"
    }

    async fn handle(&self, ctx: Arc<MessageContext>, next: Next) -> Result<Option<Reply>>;
}

/// Continuation over the remainder of a chain.
pub struct Next {
    chain: Arc<[Arc<dyn Middleware>]>,
    index: usize,
    called: Arc<AtomicBool>,
}

impl Next {
    /// Run the rest of the chain.
    pub fn run(self, ctx: Arc<MessageContext>) -> BoxFuture<'static, Option<Reply>> {
        self.called.store(true, Ordering::SeqCst);
        run_from(self.chain, self.index, ctx)
    }

    /// Number of middlewares left to run.
    pub fn remaining(&self) -> usize {
        self.chain.len().saturating_sub(self.index)
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("index", &self.index)
            .field("len", &self.chain.len())
            .finish()
    }
}

/// Entry continuation for `middlewares`, in order.
pub fn compose(middlewares: Vec<Arc<dyn Middleware>>) -> Next {
    Next {
        chain: middlewares.into(),
        index: 0,
        called: Arc::new(AtomicBool::new(false)),
    }
}

fn run_from(
    chain: Arc<[Arc<dyn Middleware>]>,
    index: usize,
    ctx: Arc<MessageContext>,
) -> BoxFuture<'static, Option<Reply>> {
    Box::pin(async move {
        let middleware = Arc::clone(chain.get(index)?);
        let called = Arc::new(AtomicBool::new(false));
        let next = Next {
            chain: Arc::clone(&chain),
            index: index + 1,
            called: Arc::clone(&called),
        };
        match middleware.handle(Arc::clone(&ctx), next).await {
            Ok(reply) => reply,
            Err(e) => {
                let continued = called.load(Ordering::SeqCst);
                warn!(
                    middleware = middleware.name(),
                    adapter = %ctx.adapter,
                    message_id = %ctx.event.message_id,
                    continued,
                    error = %e,
                    "middleware failed"
                );
                if continued {
                    None
                } else {
                    run_from(chain, index + 1, ctx).await
                }
            },
        }
    })
}

/// Middleware backed by an async closure.
pub struct FnMiddleware<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(Arc<MessageContext>, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Reply>>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, ctx: Arc<MessageContext>, next: Next) -> Result<Option<Reply>> {
        (self.f)(ctx, next).await
    }
}

/// Wrap an async closure as a middleware.
pub fn from_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn Middleware>
where
    F: Fn(Arc<MessageContext>, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Reply>>> + Send + 'static,
{
    Arc::new(FnMiddleware {
        name: name.into(),
        f,
    })
}
