//! Line-oriented adapter over stdin/stdout, for local use and demos.

use std::sync::{Arc, Mutex, Weak};

use {
    anyhow::Result,
    async_trait::async_trait,
    kindle_common::Reply,
    kindle_config::ConsoleConfig,
    tokio::{
        io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
        task::JoinHandle,
    },
    tracing::{debug, info, warn},
};

use crate::{
    Error,
    adapter::{Adapter, Bot, InboundSink},
    event::{MessageEvent, ReplyTarget, Scope},
};

type BoxedInput = Box<dyn AsyncBufRead + Unpin + Send>;
type BoxedOutput = Box<dyn AsyncWrite + Unpin + Send>;

/// Reads one message per input line and writes replies as lines.
pub struct ConsoleAdapter {
    user_id: String,
    scope: Scope,
    bot: Arc<ConsoleBot>,
    input: Mutex<Option<BoxedInput>>,
    sink: Mutex<Option<Weak<dyn InboundSink>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl ConsoleAdapter {
    /// Console adapter bound to the process stdin/stdout.
    pub fn from_config(config: &ConsoleConfig) -> crate::Result<Self> {
        Self::with_io(
            config,
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
        )
    }

    /// Console adapter over arbitrary streams.
    pub fn with_io(
        config: &ConsoleConfig,
        input: impl AsyncBufRead + Unpin + Send + 'static,
        output: impl AsyncWrite + Unpin + Send + 'static,
    ) -> crate::Result<Self> {
        let scope: Scope = config.scope.parse()?;
        if config.user_id.trim().is_empty() {
            return Err(Error::invalid_input("console user_id must not be empty"));
        }
        Ok(Self {
            user_id: config.user_id.clone(),
            scope,
            bot: Arc::new(ConsoleBot {
                self_id: config.self_id.clone(),
                output: tokio::sync::Mutex::new(Box::new(output)),
            }),
            input: Mutex::new(Some(Box::new(input))),
            sink: Mutex::new(None),
            reader: Mutex::new(None),
        })
    }

    fn event_for(&self, line: &str) -> MessageEvent {
        MessageEvent::new(self.scope, self.user_id.clone(), line)
    }
}

#[async_trait]
impl Adapter for ConsoleAdapter {
    fn name(&self) -> &str {
        "console"
    }

    fn mount(&self, sink: Weak<dyn InboundSink>) {
        *self.sink.lock().unwrap_or_else(|e| e.into_inner()) = Some(sink);
    }

    async fn start(&self) -> Result<()> {
        let sink = self
            .sink
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| Error::not_ready("console adapter started before mount"))?;
        let mut input = self
            .input
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| Error::not_ready("console adapter already started"))?;

        let bot: Arc<dyn Bot> = self.bot.clone();
        let template = self.event_for("");

        let handle = tokio::spawn(async move {
            let mut line = String::new();
            loop {
                line.clear();
                match input.read_line(&mut line).await {
                    Ok(0) => {
                        debug!("console input closed");
                        break;
                    },
                    Ok(_) => {},
                    Err(e) => {
                        warn!(error = %e, "console read failed");
                        break;
                    },
                }
                let text = line.trim();
                if text.is_empty() {
                    continue;
                }
                let Some(sink) = sink.upgrade() else {
                    debug!("kernel dropped, console reader exiting");
                    break;
                };
                let mut event = template.clone();
                event.message_id = uuid::Uuid::new_v4().to_string();
                event.raw_message = text.to_string();
                sink.dispatch("console", Arc::clone(&bot), event).await;
            }
        });

        *self.reader.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        info!(user_id = %self.user_id, scope = %self.scope, "console adapter started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let handle = self.reader.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            handle.abort();
        }
        Ok(())
    }
}

/// Bot handle that prints replies to the console output.
pub struct ConsoleBot {
    self_id: String,
    output: tokio::sync::Mutex<BoxedOutput>,
}

#[async_trait]
impl Bot for ConsoleBot {
    fn self_id(&self) -> &str {
        &self.self_id
    }

    async fn send(&self, _target: &ReplyTarget, reply: &Reply) -> Result<()> {
        let mut out = self.output.lock().await;
        let mut line = reply.plain_text();
        line.push('\n');
        out.write_all(line.as_bytes())
            .await
            .map_err(|e| Error::io("console write", e))?;
        out.flush()
            .await
            .map_err(|e| Error::io("console flush", e))?;
        Ok(())
    }
}
