//! Adapter contract.
//!
//! Each chat platform implements [`Adapter`] to feed normalized
//! [`MessageEvent`]s into the kernel through an [`InboundSink`], and exposes
//! one or more [`Bot`] handles the kernel replies through.

pub mod adapter;
pub mod console;
pub mod error;
pub mod event;
pub mod registry;

pub use {
    adapter::{Adapter, Bot, InboundSink},
    console::{ConsoleAdapter, ConsoleBot},
    error::{Error, Result},
    event::{MessageEvent, ReplyTarget, Scope, Sender},
    registry::{AdapterFactory, AdapterRegistry},
};
