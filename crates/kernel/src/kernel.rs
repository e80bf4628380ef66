//! The plugin host.
//!
//! One [`Kernel`] owns every registry: plugins, global middlewares, renders,
//! adapters and the event bus. It is always handled through an `Arc` and
//! keeps a weak reference to itself for listeners and adapters. Locks are
//! only held to copy state out; no hook, listener, middleware or adapter is
//! ever called with a lock held.

use std::{
    any::Any,
    convert::Infallible,
    fmt,
    sync::{
        Arc, RwLock, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use {
    async_trait::async_trait,
    kindle_channels::{Adapter, AdapterRegistry, Bot, InboundSink, MessageEvent},
    kindle_common::Reply,
    kindle_config::{KindleConfig, PluginEntry},
    serde_json::Value,
    tracing::{debug, error, info, warn},
};

use crate::{
    Error, Result,
    command::Command,
    event::{EventBus, EventKind, KernelEvent, SubscriberId},
    loader::{DirectorySource, PluginCatalog, PluginSource, SourceTier},
    middleware::{MessageContext, Middleware, MiddlewareId, compose},
    plugin::{LifecyclePhase, MountState, Plugin},
    render::{self, Render, RenderId},
    service::Services,
};

/// A plugin addressed by name or by instance.
#[derive(Clone, Copy)]
pub enum PluginRef<'a> {
    Name(&'a str),
    Instance(&'a Arc<Plugin>),
}

impl<'a> From<&'a str> for PluginRef<'a> {
    fn from(name: &'a str) -> Self {
        Self::Name(name)
    }
}

impl<'a> From<&'a String> for PluginRef<'a> {
    fn from(name: &'a String) -> Self {
        Self::Name(name)
    }
}

impl<'a> From<&'a Arc<Plugin>> for PluginRef<'a> {
    fn from(plugin: &'a Arc<Plugin>) -> Self {
        Self::Instance(plugin)
    }
}

impl fmt::Display for PluginRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Instance(plugin) => f.write_str(plugin.name()),
        }
    }
}

pub struct Kernel {
    config: KindleConfig,
    this: Weak<Kernel>,
    bus: EventBus,
    plugins: RwLock<Vec<Arc<Plugin>>>,
    middlewares: RwLock<Vec<(MiddlewareId, Arc<dyn Middleware>)>>,
    renders: RwLock<Vec<(RenderId, Arc<dyn Render>)>>,
    catalog: RwLock<PluginCatalog>,
    adapter_registry: RwLock<AdapterRegistry>,
    adapters: RwLock<Vec<Arc<dyn Adapter>>>,
    next_id: AtomicU64,
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plugins: Vec<String> = self.plugins().iter().map(|p| p.name().to_string()).collect();
        f.debug_struct("Kernel")
            .field("plugins", &plugins)
            .field("listeners", &self.bus.len())
            .finish_non_exhaustive()
    }
}

impl Kernel {
    pub fn new(config: KindleConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            config,
            this: this.clone(),
            bus: EventBus::new(),
            plugins: RwLock::new(Vec::new()),
            middlewares: RwLock::new(Vec::new()),
            renders: RwLock::new(Vec::new()),
            catalog: RwLock::new(PluginCatalog::new()),
            adapter_registry: RwLock::new(AdapterRegistry::with_builtin()),
            adapters: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &KindleConfig {
        &self.config
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    // ── Events ──────────────────────────────────────────────────────────────

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn on<F>(&self, kind: EventKind, listener: F) -> SubscriberId
    where
        F: Fn(&KernelEvent) + Send + Sync + 'static,
    {
        self.bus.on(kind, listener)
    }

    pub fn once<F>(&self, kind: EventKind, listener: F) -> SubscriberId
    where
        F: Fn(&KernelEvent) + Send + Sync + 'static,
    {
        self.bus.once(kind, listener)
    }

    pub fn off(&self, id: SubscriberId) -> bool {
        self.bus.off(id)
    }

    /// Emit an event: the subject plugin's hooks for lifecycle events, then
    /// kernel listeners, then every enabled plugin's own listeners.
    ///
    /// A mount-phase event whose hook fails goes no further than the hooks.
    pub fn emit(&self, event: KernelEvent) {
        if let Err(e) = self.dispatch_event(&event) {
            warn!(event = %event.kind(), error = %e, "lifecycle hook failed");
        }
    }

    /// A failing `beforeMount` or `mounted` hook stops the event before it
    /// reaches any listener; the mount is rolled back by the caller.
    fn dispatch_event(&self, event: &KernelEvent) -> anyhow::Result<()> {
        let mut outcome = Ok(());
        if let Some((phase, plugin)) = event.lifecycle() {
            outcome = plugin.run_hooks(phase);
            match phase {
                LifecyclePhase::BeforeMount | LifecyclePhase::Mounted if outcome.is_err() => {
                    return outcome;
                },
                LifecyclePhase::BeforeUnmount => plugin.release_gating(),
                _ => {},
            }
        }
        self.bus.emit(event);
        for plugin in self.plugins() {
            if plugin.is_enabled() {
                plugin.events().emit(event);
            }
        }
        outcome
    }

    // ── Plugins ─────────────────────────────────────────────────────────────

    /// Registered plugins in registration order.
    pub fn plugins(&self) -> Vec<Arc<Plugin>> {
        read(&self.plugins).clone()
    }

    pub fn plugin(&self, name: &str) -> Option<Arc<Plugin>> {
        read(&self.plugins)
            .iter()
            .find(|p| p.name() == name)
            .cloned()
    }

    fn resolve(&self, target: PluginRef<'_>) -> Option<Arc<Plugin>> {
        let plugins = read(&self.plugins);
        match target {
            PluginRef::Name(name) => plugins.iter().find(|p| p.name() == name).cloned(),
            PluginRef::Instance(plugin) => plugins.iter().find(|p| Arc::ptr_eq(p, plugin)).cloned(),
        }
    }

    fn is_registered(&self, plugin: &Arc<Plugin>) -> bool {
        read(&self.plugins).iter().any(|p| Arc::ptr_eq(p, plugin))
    }

    fn check_mountable(&self, plugin: &Plugin) -> Result<()> {
        let registered = self.plugins();
        if plugin.state() != MountState::Unmounted
            || registered.iter().any(|p| p.name() == plugin.name())
        {
            return Err(Error::DuplicatePlugin {
                name: plugin.name().to_string(),
            });
        }
        for command in plugin.top_level_commands() {
            let owner = registered.iter().find(|other| {
                other
                    .top_level_commands()
                    .iter()
                    .any(|c| c.qualified_name() == command.qualified_name())
            });
            if let Some(owner) = owner {
                return Err(Error::DuplicateCommand {
                    command: command.qualified_name(),
                    plugin: plugin.name().to_string(),
                    owner: owner.name().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Register a plugin.
    ///
    /// A plugin without required services is mounted right away; otherwise
    /// it waits in [`MountState::Mounting`] until every required service is
    /// present.
    pub fn mount(&self, plugin: impl Into<Arc<Plugin>>) -> Result<Arc<Plugin>> {
        let plugin = plugin.into();
        self.check_mountable(&plugin)?;

        if let Err(e) = self.dispatch_event(&KernelEvent::PluginBeforeMount(Arc::clone(&plugin))) {
            warn!(plugin = %plugin.name(), error = %e, "beforeMount hook failed");
            return Err(Error::hook(plugin.name(), LifecyclePhase::BeforeMount, e));
        }

        {
            let mut plugins = write(&self.plugins);
            if plugins.iter().any(|p| p.name() == plugin.name()) {
                return Err(Error::DuplicatePlugin {
                    name: plugin.name().to_string(),
                });
            }
            plugins.push(Arc::clone(&plugin));
        }
        plugin.attach(self.this.clone());
        plugin.set_state(MountState::Mounting);
        debug!(plugin = %plugin.name(), "plugin registered");

        let required = plugin.required();
        if required.is_empty() {
            self.promote(&plugin)?;
            return Ok(plugin);
        }

        self.arm_gating(&plugin);
        if self.requirements_met(&plugin) {
            self.promote(&plugin)?;
        } else if let Some(cycle) = self.find_cycle(&plugin) {
            warn!(plugin = %plugin.name(), cycle = %cycle.join(" -> "), "service dependency cycle");
            self.unmount(&plugin);
            return Err(Error::DependencyCycle { cycle });
        } else {
            info!(plugin = %plugin.name(), required = ?required, "plugin waiting for services");
        }
        Ok(plugin)
    }

    /// Make a mounting plugin's contributions visible.
    fn promote(&self, plugin: &Arc<Plugin>) -> Result<()> {
        if !self.is_registered(plugin) || !plugin.transition(MountState::Mounting, MountState::Mounted)
        {
            return Ok(());
        }
        if let Err(e) = self.dispatch_event(&KernelEvent::PluginMounted(Arc::clone(plugin))) {
            error!(plugin = %plugin.name(), error = %e, "mounted hook failed, unmounting");
            plugin.set_state(MountState::Mounting);
            self.unmount(plugin);
            return Err(Error::hook(plugin.name(), LifecyclePhase::Mounted, e));
        }
        info!(plugin = %plugin.name(), "plugin mounted");
        if plugin.is_enabled() {
            self.announce(plugin);
        }
        Ok(())
    }

    fn announce(&self, plugin: &Plugin) {
        for (name, service) in plugin.services() {
            self.emit(KernelEvent::ServiceRegister { name, service });
        }
    }

    fn withdraw(&self, plugin: &Plugin) {
        for (name, service) in plugin.services() {
            self.emit(KernelEvent::ServiceDestroy { name, service });
        }
    }

    /// Attach the two gating subscriptions to a mounting plugin.
    fn arm_gating(&self, plugin: &Arc<Plugin>) {
        let on_register = {
            let kernel = self.this.clone();
            let plugin = Arc::downgrade(plugin);
            self.bus.subscribe(EventKind::ServiceRegister, move |_| {
                let (Some(kernel), Some(plugin)) = (kernel.upgrade(), plugin.upgrade()) else {
                    return;
                };
                if plugin.state() == MountState::Mounting
                    && kernel.requirements_met(&plugin)
                    && let Err(e) = kernel.promote(&plugin)
                {
                    warn!(plugin = %plugin.name(), error = %e, "deferred mount failed");
                }
            })
        };
        let on_destroy = {
            let kernel = self.this.clone();
            let plugin = Arc::downgrade(plugin);
            self.bus.subscribe(EventKind::ServiceDestroy, move |event| {
                let KernelEvent::ServiceDestroy { name, .. } = event else {
                    return;
                };
                let (Some(kernel), Some(plugin)) = (kernel.upgrade(), plugin.upgrade()) else {
                    return;
                };
                if plugin.requires(name)
                    && plugin.state() == MountState::Mounted
                    && !kernel.has_service(name)
                {
                    kernel.suspend(&plugin, name);
                }
            })
        };
        plugin.hold_gating(vec![on_register, on_destroy]);
    }

    /// A required service went away: tear the plugin's contributions down
    /// and wait for the service again.
    fn suspend(&self, plugin: &Arc<Plugin>, missing: &str) {
        if !plugin.transition(MountState::Mounted, MountState::Mounting) {
            return;
        }
        warn!(plugin = %plugin.name(), service = missing, "required service lost, plugin suspended");
        self.emit(KernelEvent::PluginBeforeUnmount(Arc::clone(plugin)));
        if plugin.is_enabled() {
            self.withdraw(plugin);
        }
        if self.is_registered(plugin) {
            self.arm_gating(plugin);
        }
    }

    fn requirements_met(&self, plugin: &Plugin) -> bool {
        let services = self.services();
        plugin.required().iter().all(|name| services.contains(name))
    }

    /// Walk the waits-for graph among mounting plugins looking for a path
    /// back to `start`. Returns plugin names, first and last equal.
    fn find_cycle(&self, start: &Arc<Plugin>) -> Option<Vec<String>> {
        let services = self.services();
        let waiting: Vec<Arc<Plugin>> = self
            .plugins()
            .into_iter()
            .filter(|p| p.state() == MountState::Mounting)
            .collect();
        let origin = waiting.iter().position(|p| Arc::ptr_eq(p, start))?;

        let edges: Vec<Vec<usize>> = waiting
            .iter()
            .map(|p| {
                let missing: Vec<String> = p
                    .required()
                    .into_iter()
                    .filter(|name| !services.contains(name))
                    .collect();
                waiting
                    .iter()
                    .enumerate()
                    .filter(|(_, q)| missing.iter().any(|name| q.provides(name)))
                    .map(|(i, _)| i)
                    .collect()
            })
            .collect();

        fn walk(
            edges: &[Vec<usize>],
            node: usize,
            origin: usize,
            path: &mut Vec<usize>,
            seen: &mut [bool],
        ) -> bool {
            for &next in &edges[node] {
                if next == origin {
                    return true;
                }
                if seen[next] {
                    continue;
                }
                seen[next] = true;
                path.push(next);
                if walk(edges, next, origin, path, seen) {
                    return true;
                }
                path.pop();
            }
            false
        }

        let mut path = vec![origin];
        let mut seen = vec![false; waiting.len()];
        seen[origin] = true;
        walk(&edges, origin, origin, &mut path, &mut seen).then(|| {
            path.iter()
                .chain(std::iter::once(&origin))
                .map(|&i| waiting[i].name().to_string())
                .collect()
        })
    }

    /// Remove a plugin. Returns `false`, with a warning, if `target` is not a
    /// registered plugin.
    pub fn unmount<'a>(&self, target: impl Into<PluginRef<'a>>) -> bool {
        let target = target.into();
        let Some(plugin) = self.resolve(target) else {
            warn!(plugin = %target, "unmount target is not a registered plugin");
            return false;
        };
        let announced = plugin.is_active();

        self.emit(KernelEvent::PluginBeforeUnmount(Arc::clone(&plugin)));
        write(&self.plugins).retain(|p| !Arc::ptr_eq(p, &plugin));
        plugin.detach();
        plugin.set_state(MountState::Unmounted);
        plugin.release_gating();
        if announced {
            self.withdraw(&plugin);
        }
        info!(plugin = %plugin.name(), "plugin unmounted");
        self.emit(KernelEvent::PluginUnmounted(plugin));
        true
    }

    /// Make a registered plugin contribute again.
    pub fn enable<'a>(&self, target: impl Into<PluginRef<'a>>) -> Result<()> {
        let target = target.into();
        let plugin = self
            .resolve(target)
            .ok_or_else(|| Error::unknown_plugin(target.to_string()))?;
        if plugin.is_enabled() {
            return Ok(());
        }
        plugin.enable();
        info!(plugin = %plugin.name(), "plugin enabled");
        if plugin.state() == MountState::Mounted {
            self.announce(&plugin);
        }
        Ok(())
    }

    /// Hide a registered plugin's contributions without unmounting it.
    pub fn disable<'a>(&self, target: impl Into<PluginRef<'a>>) -> Result<()> {
        let target = target.into();
        let plugin = self
            .resolve(target)
            .ok_or_else(|| Error::unknown_plugin(target.to_string()))?;
        if !plugin.is_enabled() {
            return Ok(());
        }
        let announced = plugin.is_active();
        plugin.disable();
        info!(plugin = %plugin.name(), "plugin disabled");
        if announced {
            self.withdraw(&plugin);
        }
        Ok(())
    }

    /// Run `installer` against `plugin`, then mount it. Failures are logged;
    /// a plugin whose mount fails part-way is unmounted again.
    pub fn use_plugin<F>(&self, plugin: Plugin, installer: F) -> Result<Arc<Plugin>>
    where
        F: FnOnce(&Plugin) -> anyhow::Result<()>,
    {
        let name = plugin.name().to_string();
        if let Err(e) = installer(&plugin) {
            error!(plugin = %name, error = %e, "plugin installer failed");
            return Err(Error::Install {
                plugin: name,
                source: e.into(),
            });
        }
        self.mount(plugin).inspect_err(|e| {
            error!(plugin = %name, error = %e, "failed to mount plugin");
        })
    }

    // ── Services ────────────────────────────────────────────────────────────

    /// Services of enabled, mounted plugins; first provider wins.
    pub fn services(&self) -> Services {
        let mut services = Services::default();
        for plugin in self.plugins() {
            if !plugin.is_active() {
                continue;
            }
            for (name, service) in plugin.services() {
                services.insert_if_absent(&name, plugin.name(), &service);
            }
        }
        services
    }

    pub fn service<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.services().get_as::<T>(name)
    }

    pub fn has_service(&self, name: &str) -> bool {
        self.services().contains(name)
    }

    // ── Middlewares & renders ───────────────────────────────────────────────

    /// Add a global middleware, run before any plugin middleware.
    pub fn middleware(&self, middleware: Arc<dyn Middleware>) -> MiddlewareId {
        let id = MiddlewareId(self.next_id());
        write(&self.middlewares).push((id, middleware));
        id
    }

    pub fn remove_middleware(&self, id: MiddlewareId) -> bool {
        let mut middlewares = write(&self.middlewares);
        let before = middlewares.len();
        middlewares.retain(|(i, _)| *i != id);
        middlewares.len() != before
    }

    /// The chain an event from `adapter` runs through right now.
    pub fn supported_middlewares(&self, adapter: &str) -> Vec<Arc<dyn Middleware>> {
        let mut chain: Vec<Arc<dyn Middleware>> = read(&self.middlewares)
            .iter()
            .map(|(_, m)| Arc::clone(m))
            .collect();
        for plugin in self.plugins() {
            if plugin.is_active() && plugin.admits(adapter) {
                chain.extend(plugin.middlewares());
            }
        }
        chain
    }

    pub fn register_render(&self, render: Arc<dyn Render>) -> RenderId {
        let id = RenderId(self.next_id());
        write(&self.renders).push((id, render));
        id
    }

    pub fn remove_render(&self, id: RenderId) -> bool {
        let mut renders = write(&self.renders);
        let before = renders.len();
        renders.retain(|(i, _)| *i != id);
        renders.len() != before
    }

    /// Run `template` through every render in registration order.
    pub fn render_message(&self, template: &str, event: Option<&MessageEvent>) -> String {
        let renders: Vec<Arc<dyn Render>> = read(&self.renders)
            .iter()
            .map(|(_, r)| Arc::clone(r))
            .collect();
        render::apply(&renders, template, event, |index, e| {
            warn!(render = index, error = %e, "render failed, keeping previous text");
        })
    }

    fn render_reply(&self, reply: &mut Reply, event: Option<&MessageEvent>) {
        let Ok(()) = reply.map_text(|text| Ok::<_, Infallible>(self.render_message(text, event)));
    }

    // ── Commands ────────────────────────────────────────────────────────────

    /// Every command, children included, of enabled and mounted plugins.
    pub fn commands(&self) -> Vec<Arc<Command>> {
        self.plugins()
            .iter()
            .filter(|p| p.is_active())
            .flat_map(|p| p.commands())
            .collect()
    }

    /// Top-level commands available to events from `adapter`.
    pub fn supported_commands(&self, adapter: &str) -> Vec<Arc<Command>> {
        self.plugins()
            .iter()
            .filter(|p| p.is_active() && p.admits(adapter))
            .flat_map(|p| p.top_level_commands())
            .collect()
    }

    /// Look a command up by dotted path (`帮助.插件`), falling back to
    /// top-level triggers and aliases.
    pub fn find_command(&self, name: &str) -> Option<Arc<Command>> {
        let commands = self.commands();
        commands
            .iter()
            .find(|c| c.qualified_name() == name)
            .or_else(|| commands.iter().find(|c| c.answers_to(name)))
            .cloned()
    }

    // ── Dispatch ────────────────────────────────────────────────────────────

    /// Run one inbound event through the middleware chain and deliver the
    /// reply, if any. Returns the reply as sent.
    pub async fn handle_message(
        &self,
        adapter: &str,
        bot: Arc<dyn Bot>,
        event: MessageEvent,
    ) -> Option<Reply> {
        let kernel = self.this.upgrade()?;
        self.emit(KernelEvent::Message {
            adapter: adapter.to_string(),
            event: event.clone(),
        });

        let chain = self.supported_middlewares(adapter);
        debug!(adapter, message_id = %event.message_id, middlewares = chain.len(), "dispatching message");
        let ctx = Arc::new(MessageContext {
            kernel,
            adapter: adapter.to_string(),
            bot: Arc::clone(&bot),
            event,
        });

        let mut reply = compose(chain).run(Arc::clone(&ctx)).await?;
        if reply.is_empty() {
            return None;
        }
        self.render_reply(&mut reply, Some(&ctx.event));
        if let Err(e) = bot.send(&ctx.event.target, &reply).await {
            warn!(adapter, bot = bot.self_id(), error = %e, "failed to send reply");
        }
        Some(reply)
    }

    // ── Loading ─────────────────────────────────────────────────────────────

    /// Add a builtin plugin entry.
    pub fn register_plugin_factory<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Value) -> anyhow::Result<Plugin> + Send + Sync + 'static,
    {
        write(&self.catalog).register(name, factory);
    }

    pub fn catalog(&self) -> PluginCatalog {
        read(&self.catalog).clone()
    }

    /// Plugin sources in lookup order.
    pub fn plugin_sources(&self) -> Vec<Box<dyn PluginSource>> {
        let catalog = self.catalog();
        let mut sources: Vec<Box<dyn PluginSource>> = self
            .config
            .plugin_dirs
            .iter()
            .map(|dir| {
                Box::new(DirectorySource::new(dir.clone(), SourceTier::User, catalog.clone()))
                    as Box<dyn PluginSource>
            })
            .collect();
        sources.push(Box::new(catalog.clone()));
        if let Some(data_dir) = kindle_config::data_dir() {
            sources.push(Box::new(DirectorySource::new(
                data_dir.join("plugins"),
                SourceTier::Community,
                catalog,
            )));
        }
        sources
    }

    /// Load `name` from the first source that can build and mount it.
    pub fn load_plugin(&self, name: &str, options: &Value) -> Result<Arc<Plugin>> {
        self.load_candidate(name, options, true)
    }

    fn load_candidate(&self, name: &str, options: &Value, enable: bool) -> Result<Arc<Plugin>> {
        let mut failures = Vec::new();
        for source in self.plugin_sources() {
            let candidate = match source.load(name, options) {
                Ok(candidate) => candidate,
                Err(e) => {
                    debug!(plugin = name, source = %source.describe(), error = %e, "plugin candidate failed");
                    failures.push(format!("{}: {e}", source.describe()));
                    continue;
                },
            };
            if !enable {
                candidate.disable();
            }
            match self.mount(candidate) {
                Ok(plugin) => {
                    info!(plugin = %plugin.name(), source = %source.tier(), "plugin loaded");
                    return Ok(plugin);
                },
                Err(e) => {
                    debug!(plugin = name, source = %source.describe(), error = %e, "plugin candidate failed to mount");
                    failures.push(format!("{}: {e}", source.describe()));
                },
            }
        }
        warn!(plugin = name, "no source could load plugin");
        Err(Error::Load {
            name: name.to_string(),
            reason: failures.join("; "),
        })
    }

    /// Load every plugin listed in the config. Returns how many loaded.
    pub fn load_configured_plugins(&self) -> usize {
        self.config
            .plugins
            .iter()
            .filter(|entry: &&PluginEntry| {
                self.load_candidate(&entry.name, &entry.options, entry.enable)
                    .is_ok()
            })
            .count()
    }

    // ── Adapters & lifecycle ────────────────────────────────────────────────

    pub fn register_adapter<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn(&KindleConfig) -> anyhow::Result<Arc<dyn Adapter>> + Send + Sync + 'static,
    {
        write(&self.adapter_registry).register(name, factory);
    }

    pub fn adapters(&self) -> Vec<Arc<dyn Adapter>> {
        read(&self.adapters).clone()
    }

    /// Create and mount the configured adapters. Failures are logged.
    fn init_adapters(&self) -> Vec<Arc<dyn Adapter>> {
        let sink: Weak<dyn InboundSink> = self.this.clone();
        let registry = read(&self.adapter_registry).clone();
        let mut created = Vec::new();
        for name in &self.config.adapters {
            match registry.create(name, &self.config) {
                Ok(adapter) => {
                    adapter.mount(sink.clone());
                    created.push(adapter);
                },
                Err(e) => error!(adapter = %name, error = %e, "failed to create adapter"),
            }
        }
        write(&self.adapters).extend(created.iter().cloned());
        created
    }

    /// Load configured plugins, start configured adapters, then emit `Start`
    /// and `Ready`.
    pub async fn start(&self) {
        let loaded = self.load_configured_plugins();
        info!(plugins = loaded, "configured plugins loaded");

        for adapter in self.init_adapters() {
            match adapter.start().await {
                Ok(()) => info!(adapter = adapter.name(), "adapter started"),
                Err(e) => error!(adapter = adapter.name(), error = %e, "adapter failed to start"),
            }
        }
        self.emit(KernelEvent::Start);
        self.emit(KernelEvent::Ready);
    }

    /// Stop adapters, then unmount every plugin in reverse registration order.
    pub async fn stop(&self) {
        let adapters = std::mem::take(&mut *write(&self.adapters));
        for adapter in adapters {
            if let Err(e) = adapter.stop().await {
                warn!(adapter = adapter.name(), error = %e, "adapter failed to stop");
            }
        }
        for plugin in self.plugins().iter().rev() {
            self.unmount(plugin);
        }
        info!("kernel stopped");
    }
}

#[async_trait]
impl InboundSink for Kernel {
    async fn dispatch(&self, adapter: &str, bot: Arc<dyn Bot>, event: MessageEvent) {
        self.handle_message(adapter, bot, event).await;
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use {
        super::*,
        crate::testing::{RecordingBot, recording},
        kindle_channels::{ConsoleAdapter, Scope},
        serde_json::json,
    };

    fn kernel() -> Arc<Kernel> {
        Kernel::new(KindleConfig {
            plugin_dirs: Vec::new(),
            ..KindleConfig::default()
        })
    }

    fn log() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn upper() -> Arc<dyn Render> {
        Arc::new(|t: &str, _: Option<&MessageEvent>| -> anyhow::Result<String> {
            Ok(t.to_uppercase())
        })
    }

    #[tokio::test]
    async fn short_circuit_reply_is_rendered_and_sent() {
        let kernel = kernel();
        let seen = log();
        kernel.middleware(recording("first", &seen, Some("pong")));
        kernel.middleware(recording("second", &seen, Some("never")));
        kernel.register_render(upper());

        let bot = Arc::new(RecordingBot::default());
        let reply = kernel
            .handle_message("test", Arc::clone(&bot) as Arc<dyn Bot>, MessageEvent::private("u1", "ping"))
            .await
            .unwrap();

        assert_eq!(reply.plain_text(), "PONG");
        assert_eq!(bot.texts(), vec!["PONG"]);
        assert_eq!(*seen.lock().unwrap(), vec!["first"]);
        let sent = bot.sent.lock().unwrap();
        assert_eq!(sent[0].0.conversation_id, "u1");
        assert_eq!(sent[0].0.scope, Scope::Private);
    }

    #[tokio::test]
    async fn unanswered_message_sends_nothing() {
        let kernel = kernel();
        let seen = log();
        kernel.middleware(recording("only", &seen, None));
        let bot = Arc::new(RecordingBot::default());
        let reply = kernel
            .handle_message("test", Arc::clone(&bot) as Arc<dyn Bot>, MessageEvent::private("u1", "hi"))
            .await;
        assert!(reply.is_none());
        assert!(bot.texts().is_empty());
    }

    #[tokio::test]
    async fn empty_reply_counts_as_unanswered() {
        let kernel = kernel();
        let seen = log();
        kernel.middleware(recording("blank", &seen, Some("")));
        let bot = Arc::new(RecordingBot::default());
        let reply = kernel
            .handle_message("test", Arc::clone(&bot) as Arc<dyn Bot>, MessageEvent::private("u1", "hi"))
            .await;
        assert!(reply.is_none());
        assert!(bot.texts().is_empty());
    }

    #[tokio::test]
    async fn message_event_reaches_listeners() {
        let kernel = kernel();
        let adapters = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&adapters);
        kernel.on(EventKind::Message, move |event| {
            if let KernelEvent::Message { adapter, event } = event {
                sink.lock()
                    .unwrap()
                    .push(format!("{adapter}:{}", event.raw_message));
            }
        });
        kernel
            .handle_message("test", Arc::new(RecordingBot::default()), MessageEvent::private("u1", "hey"))
            .await;
        assert_eq!(*adapters.lock().unwrap(), vec!["test:hey"]);
    }

    #[test]
    fn failing_render_keeps_template() {
        let kernel = kernel();
        let failing: Arc<dyn Render> =
            Arc::new(|_: &str, _: Option<&MessageEvent>| -> anyhow::Result<String> {
                anyhow::bail!("bad template")
            });
        kernel.register_render(failing);
        assert_eq!(kernel.render_message("hello", None), "hello");

        let id = kernel.register_render(upper());
        assert_eq!(kernel.render_message("hello", None), "HELLO");
        assert!(kernel.remove_render(id));
        assert!(!kernel.remove_render(id));
        assert_eq!(kernel.render_message("hello", None), "hello");
    }

    #[test]
    fn middlewares_respect_adapter_allowlist() {
        let kernel = kernel();
        let seen = log();
        let global = kernel.middleware(recording("global", &seen, None));

        let console_only = Plugin::new("console-only");
        console_only
            .adapters(["console"])
            .middleware(recording("console", &seen, None));
        kernel.mount(console_only).unwrap();

        assert_eq!(kernel.supported_middlewares("console").len(), 2);
        assert_eq!(kernel.supported_middlewares("onebot").len(), 1);
        assert!(kernel.remove_middleware(global));
        assert_eq!(kernel.supported_middlewares("onebot").len(), 0);
    }

    #[test]
    fn commands_follow_plugin_visibility() {
        let kernel = kernel();
        let tools = Plugin::new("tools");
        tools
            .command(Command::new("/帮助 [name:string]").unwrap().alias("help"))
            .unwrap()
            .command(Command::new("/帮助 插件").unwrap())
            .unwrap();
        kernel.mount(tools).unwrap();

        assert_eq!(kernel.supported_commands("test").len(), 1);
        assert_eq!(kernel.commands().len(), 2);
        assert_eq!(kernel.find_command("帮助.插件").unwrap().name(), "插件");
        assert_eq!(kernel.find_command("help").unwrap().name(), "帮助");
        assert!(kernel.find_command("插件").is_none());

        kernel.disable("tools").unwrap();
        assert!(kernel.supported_commands("test").is_empty());
        assert!(kernel.find_command("帮助").is_none());
    }

    #[test]
    fn top_level_command_names_are_unique_across_plugins() {
        let kernel = kernel();
        let first = Plugin::new("first");
        first.command(Command::new("/ping").unwrap()).unwrap();
        kernel.mount(first).unwrap();

        let second = Plugin::new("second");
        second.command(Command::new("/ping").unwrap()).unwrap();
        let err = kernel.mount(second).unwrap_err();
        assert!(matches!(err, Error::DuplicateCommand { ref owner, .. } if owner == "first"));
        assert!(kernel.plugin("second").is_none());
    }

    #[test]
    fn plugin_surface_receives_kernel_events_while_enabled() {
        let kernel = kernel();
        let listener = Plugin::new("listener");
        let ready = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&ready);
        listener.on(EventKind::Ready, move |_| *counter.lock().unwrap() += 1);
        kernel.mount(listener).unwrap();

        kernel.emit(KernelEvent::Ready);
        kernel.disable("listener").unwrap();
        kernel.emit(KernelEvent::Ready);
        assert_eq!(*ready.lock().unwrap(), 1);
    }

    #[test]
    fn loads_builtin_plugins_from_catalog() {
        let kernel = kernel();
        kernel.register_plugin_factory("greeter", |options: &Value| {
            let plugin = Plugin::new("greeter");
            plugin.service(
                "greeting",
                options["text"].as_str().unwrap_or("hi").to_string(),
            );
            Ok(plugin)
        });

        let plugin = kernel
            .load_plugin("greeter", &json!({ "text": "hello" }))
            .unwrap();
        assert!(plugin.is_active());
        assert_eq!(*kernel.service::<String>("greeting").unwrap(), "hello");

        let err = kernel.load_plugin("missing", &Value::Null).unwrap_err();
        assert!(matches!(err, Error::Load { ref name, .. } if name == "missing"));
    }

    #[test]
    fn user_directories_take_precedence() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("greeter");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(crate::loader::MANIFEST_FILE),
            "description = \"from disk\"\n[options]\ntext = \"disk\"\n",
        )
        .unwrap();

        let kernel = Kernel::new(KindleConfig {
            plugin_dirs: vec![tmp.path().to_path_buf()],
            plugins: vec![PluginEntry {
                name: "greeter".into(),
                enable: false,
                options: Value::Null,
            }],
            ..KindleConfig::default()
        });
        kernel.register_plugin_factory("greeter", |options: &Value| {
            let plugin = Plugin::new("greeter");
            plugin.service(
                "greeting",
                options["text"].as_str().unwrap_or("builtin").to_string(),
            );
            Ok(plugin)
        });

        assert_eq!(kernel.load_configured_plugins(), 1);
        let plugin = kernel.plugin("greeter").unwrap();
        assert_eq!(plugin.description(), "from disk");
        assert!(!plugin.is_enabled());
        assert!(!kernel.has_service("greeting"));

        kernel.enable("greeter").unwrap();
        assert_eq!(*kernel.service::<String>("greeting").unwrap(), "disk");
    }

    #[tokio::test]
    async fn stop_unmounts_in_reverse_order() {
        let kernel = kernel();
        let order = log();
        for name in ["a", "b", "c"] {
            let plugin = Plugin::new(name);
            let order = Arc::clone(&order);
            plugin.on_unmounted(move |_| {
                order.lock().unwrap().push(name);
                Ok(())
            });
            kernel.mount(plugin).unwrap();
        }
        kernel.stop().await;
        assert_eq!(*order.lock().unwrap(), vec!["c", "b", "a"]);
        assert!(kernel.plugins().is_empty());
    }

    #[tokio::test]
    async fn adapter_factory_may_register_adapters() {
        let kernel = Kernel::new(KindleConfig {
            adapters: vec!["console".into()],
            plugin_dirs: Vec::new(),
            ..KindleConfig::default()
        });
        let weak = Arc::downgrade(&kernel);
        kernel.register_adapter("console", move |config: &KindleConfig| {
            if let Some(kernel) = weak.upgrade() {
                kernel.register_adapter("late", |_: &KindleConfig| anyhow::bail!("never built"));
            }
            let adapter = ConsoleAdapter::with_io(&config.console, &b""[..], tokio::io::sink())?;
            Ok(Arc::new(adapter) as Arc<dyn Adapter>)
        });

        kernel.start().await;
        assert_eq!(kernel.adapters().len(), 1);
        assert!(read(&kernel.adapter_registry).contains("late"));
        kernel.stop().await;
    }
}
