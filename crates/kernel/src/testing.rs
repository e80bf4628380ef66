#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex};

use {
    async_trait::async_trait,
    kindle_channels::{Bot, MessageEvent, ReplyTarget, Scope},
    kindle_common::Reply,
};

use crate::{
    kernel::Kernel,
    middleware::{MessageContext, Middleware, Next},
};

/// Collects everything the kernel sends.
#[derive(Default)]
pub(crate) struct RecordingBot {
    pub sent: Mutex<Vec<(ReplyTarget, Reply)>>,
}

impl RecordingBot {
    pub fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, reply)| reply.plain_text())
            .collect()
    }
}

#[async_trait]
impl Bot for RecordingBot {
    fn self_id(&self) -> &str {
        "test-bot"
    }

    async fn send(&self, target: &ReplyTarget, reply: &Reply) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((target.clone(), reply.clone()));
        Ok(())
    }
}

pub(crate) fn context(kernel: &Arc<Kernel>, text: &str) -> Arc<MessageContext> {
    context_in(kernel, Scope::Private, text)
}

pub(crate) fn context_in(kernel: &Arc<Kernel>, scope: Scope, text: &str) -> Arc<MessageContext> {
    Arc::new(MessageContext {
        kernel: Arc::clone(kernel),
        adapter: "test".into(),
        bot: Arc::new(RecordingBot::default()),
        event: MessageEvent::new(scope, "u1", text),
    })
}

struct Recording {
    name: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
    reply: Option<&'static str>,
}

#[async_trait]
impl Middleware for Recording {
    fn name(&self) -> &str {
        self.name
    }

    async fn handle(&self, ctx: Arc<MessageContext>, next: Next) -> anyhow::Result<Option<Reply>> {
        self.log.lock().unwrap().push(self.name);
        match self.reply {
            Some(text) => Ok(Some(Reply::text(text))),
            None => Ok(next.run(ctx).await),
        }
    }
}

/// Middleware that logs its name, then answers with `reply` or defers to
/// `next`.
pub(crate) fn recording(
    name: &'static str,
    log: &Arc<Mutex<Vec<&'static str>>>,
    reply: Option<&'static str>,
) -> Arc<dyn Middleware> {
    Arc::new(Recording {
        name,
        log: Arc::clone(log),
        reply,
    })
}
