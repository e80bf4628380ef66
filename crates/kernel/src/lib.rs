//! Plugin host for kindle.
//!
//! A [`Kernel`] mounts [`Plugin`]s, gates them on the services they require,
//! composes their middlewares into one dispatch chain per message and routes
//! commands declared with templates like `/帮助 [name:string]`.

pub mod command;
pub mod error;
pub mod event;
pub mod kernel;
pub mod loader;
pub mod middleware;
pub mod plugin;
pub mod render;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

pub use {
    command::{
        Action, ArgSpec, ArgType, Command, CommandContext, HelpOptions, OptionSpec, Permission,
        SugarMapping, tokenize,
    },
    error::{Error, Result},
    event::{EventBus, EventKind, KernelEvent, SubscriberId, Subscription},
    kernel::{Kernel, PluginRef},
    loader::{
        DirectorySource, MANIFEST_FILE, PluginCatalog, PluginFactory, PluginManifest,
        PluginSource, SourceTier,
    },
    middleware::{FnMiddleware, MessageContext, Middleware, MiddlewareId, Next, compose, from_fn},
    plugin::{Hook, LifecyclePhase, MountState, Plugin, PluginStatus},
    render::{Render, RenderId},
    service::{Service, Services},
};
