//! Plugin definition.
//!
//! A [`Plugin`] is a named bundle of middlewares, commands and services with
//! lifecycle hooks. Contributions are declared through `&self` methods before
//! the plugin is handed to the kernel; the kernel owns mount state and the
//! back-reference.

use std::{
    any::Any,
    fmt,
    sync::{
        Arc, Mutex, RwLock, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use {serde::Serialize, tracing::debug, uuid::Uuid};

use crate::{
    Error, Result,
    command::Command,
    event::{EventBus, EventKind, KernelEvent, SubscriberId, Subscription},
    kernel::Kernel,
    middleware::Middleware,
    service::Service,
};

/// Lifecycle phase a hook is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecyclePhase {
    BeforeMount,
    Mounted,
    BeforeUnmount,
    Unmounted,
}

impl LifecyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BeforeMount => "beforeMount",
            Self::Mounted => "mounted",
            Self::BeforeUnmount => "beforeUnmount",
            Self::Unmounted => "unmounted",
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a plugin contributes anything, independent of mount state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MountState {
    /// Not held by a kernel.
    Unmounted,
    /// Held by a kernel, waiting for required services.
    Mounting,
    /// Held by a kernel and contributing.
    Mounted,
}

pub type Hook = Arc<dyn Fn(&Plugin) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
struct Hooks {
    before_mount: Vec<Hook>,
    mounted: Vec<Hook>,
    before_unmount: Vec<Hook>,
    unmounted: Vec<Hook>,
}

impl Hooks {
    fn phase_mut(&mut self, phase: LifecyclePhase) -> &mut Vec<Hook> {
        match phase {
            LifecyclePhase::BeforeMount => &mut self.before_mount,
            LifecyclePhase::Mounted => &mut self.mounted,
            LifecyclePhase::BeforeUnmount => &mut self.before_unmount,
            LifecyclePhase::Unmounted => &mut self.unmounted,
        }
    }

    fn phase(&self, phase: LifecyclePhase) -> &[Hook] {
        match phase {
            LifecyclePhase::BeforeMount => &self.before_mount,
            LifecyclePhase::Mounted => &self.mounted,
            LifecyclePhase::BeforeUnmount => &self.before_unmount,
            LifecyclePhase::Unmounted => &self.unmounted,
        }
    }
}

pub struct Plugin {
    name: String,
    description: RwLock<String>,
    enabled: AtomicBool,
    state: RwLock<MountState>,
    adapters: RwLock<Vec<String>>,
    required: RwLock<Vec<String>>,
    middlewares: RwLock<Vec<Arc<dyn Middleware>>>,
    commands: RwLock<Vec<Arc<Command>>>,
    services: RwLock<Vec<(String, Service)>>,
    hooks: RwLock<Hooks>,
    events: EventBus,
    kernel: RwLock<Weak<Kernel>>,
    gating: Mutex<Vec<Subscription>>,
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("status", &self.status())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Plugin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: RwLock::new(String::new()),
            enabled: AtomicBool::new(true),
            state: RwLock::new(MountState::Unmounted),
            adapters: RwLock::new(Vec::new()),
            required: RwLock::new(Vec::new()),
            middlewares: RwLock::new(Vec::new()),
            commands: RwLock::new(Vec::new()),
            services: RwLock::new(Vec::new()),
            hooks: RwLock::new(Hooks::default()),
            events: EventBus::new(),
            kernel: RwLock::new(Weak::new()),
            gating: Mutex::new(Vec::new()),
        }
    }

    /// Plugin with a generated `plugin-<id>` name.
    pub fn anonymous() -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self::new(format!("plugin-{}", &id[..8]))
    }

    /// Same plugin under another name. Only meaningful before mounting.
    #[must_use]
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> String {
        read(&self.description).clone()
    }

    pub fn describe(&self, description: impl Into<String>) -> &Self {
        *write(&self.description) = description.into();
        self
    }

    // ── Contributions ───────────────────────────────────────────────────────

    pub fn middleware(&self, middleware: Arc<dyn Middleware>) -> &Self {
        write(&self.middlewares).push(middleware);
        self
    }

    /// Contribute a service under `name`. Re-declaring a name replaces the
    /// earlier implementation in place.
    pub fn service<T: Any + Send + Sync>(&self, name: impl Into<String>, service: T) -> &Self {
        self.service_arc(name, Arc::new(service))
    }

    pub fn service_arc(&self, name: impl Into<String>, service: Service) -> &Self {
        let name = name.into();
        let mut services = write(&self.services);
        match services.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = service,
            None => services.push((name, service)),
        }
        self
    }

    /// Declare a service that must be present before this plugin is mounted.
    pub fn require(&self, name: impl Into<String>) -> &Self {
        let name = name.into();
        let mut required = write(&self.required);
        if !required.contains(&name) {
            required.push(name);
        }
        self
    }

    /// Register a command. A command whose template names a parent path is
    /// attached under the parent, which must already be registered here.
    pub fn command(&self, command: Command) -> Result<&Self> {
        let mut commands = write(&self.commands);
        let qualified = command.qualified_name();
        if commands.iter().any(|c| c.qualified_name() == qualified) {
            return Err(Error::DuplicateCommand {
                command: qualified,
                plugin: self.name.clone(),
                owner: self.name.clone(),
            });
        }
        if let Some(parent) = command.parent()
            && !commands.iter().any(|c| c.qualified_name() == parent)
        {
            return Err(Error::UnknownParent {
                command: qualified,
                parent: parent.to_string(),
            });
        }
        commands.push(Arc::new(command));
        Ok(self)
    }

    /// Restrict the plugin to the named adapters. An empty list admits every
    /// adapter.
    pub fn adapters<I, S>(&self, names: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *write(&self.adapters) = names.into_iter().map(Into::into).collect();
        self
    }

    // ── Hooks ───────────────────────────────────────────────────────────────

    pub fn hook<F>(&self, phase: LifecyclePhase, hook: F) -> &Self
    where
        F: Fn(&Plugin) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        write(&self.hooks).phase_mut(phase).push(Arc::new(hook));
        self
    }

    pub fn before_mount<F>(&self, hook: F) -> &Self
    where
        F: Fn(&Plugin) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hook(LifecyclePhase::BeforeMount, hook)
    }

    pub fn on_mounted<F>(&self, hook: F) -> &Self
    where
        F: Fn(&Plugin) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hook(LifecyclePhase::Mounted, hook)
    }

    pub fn before_unmount<F>(&self, hook: F) -> &Self
    where
        F: Fn(&Plugin) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hook(LifecyclePhase::BeforeUnmount, hook)
    }

    pub fn on_unmounted<F>(&self, hook: F) -> &Self
    where
        F: Fn(&Plugin) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hook(LifecyclePhase::Unmounted, hook)
    }

    /// Run every hook of `phase` in registration order. All hooks run; the
    /// first failure is returned.
    pub(crate) fn run_hooks(&self, phase: LifecyclePhase) -> anyhow::Result<()> {
        let hooks: Vec<Hook> = read(&self.hooks).phase(phase).to_vec();
        let mut first_error = None;
        for hook in hooks {
            if let Err(e) = hook(self) {
                debug!(plugin = %self.name, phase = %phase, error = %e, "plugin hook failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    // ── Events ──────────────────────────────────────────────────────────────

    /// The plugin's own event surface; kernel events are rebroadcast here
    /// while the plugin is enabled.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn on<F>(&self, kind: EventKind, listener: F) -> SubscriberId
    where
        F: Fn(&KernelEvent) + Send + Sync + 'static,
    {
        self.events.on(kind, listener)
    }

    // ── Status ──────────────────────────────────────────────────────────────

    pub fn status(&self) -> PluginStatus {
        if self.enabled.load(Ordering::SeqCst) {
            PluginStatus::Enabled
        } else {
            PluginStatus::Disabled
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.status() == PluginStatus::Enabled
    }

    /// Mark the plugin enabled. Prefer [`Kernel::enable`] for registered
    /// plugins.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn state(&self) -> MountState {
        *read(&self.state)
    }

    /// Mounted and enabled: the plugin's contributions are visible.
    pub fn is_active(&self) -> bool {
        self.is_enabled() && self.state() == MountState::Mounted
    }

    pub fn admits(&self, adapter: &str) -> bool {
        let adapters = read(&self.adapters);
        adapters.is_empty() || adapters.iter().any(|a| a == adapter)
    }

    /// The kernel holding this plugin, if any.
    pub fn kernel(&self) -> Option<Arc<Kernel>> {
        read(&self.kernel).upgrade()
    }

    // ── Snapshots ───────────────────────────────────────────────────────────

    pub fn middlewares(&self) -> Vec<Arc<dyn Middleware>> {
        read(&self.middlewares).clone()
    }

    pub fn commands(&self) -> Vec<Arc<Command>> {
        read(&self.commands).clone()
    }

    pub fn top_level_commands(&self) -> Vec<Arc<Command>> {
        read(&self.commands)
            .iter()
            .filter(|c| c.parent().is_none())
            .cloned()
            .collect()
    }

    pub fn services(&self) -> Vec<(String, Service)> {
        read(&self.services).clone()
    }

    pub fn provides(&self, name: &str) -> bool {
        read(&self.services).iter().any(|(n, _)| n == name)
    }

    pub fn required(&self) -> Vec<String> {
        read(&self.required).clone()
    }

    pub fn requires(&self, name: &str) -> bool {
        read(&self.required).iter().any(|n| n == name)
    }

    // ── Kernel bookkeeping ──────────────────────────────────────────────────

    pub(crate) fn set_state(&self, state: MountState) {
        *write(&self.state) = state;
    }

    /// Move from `from` to `to`; `false` if the plugin was not in `from`.
    pub(crate) fn transition(&self, from: MountState, to: MountState) -> bool {
        let mut state = write(&self.state);
        if *state != from {
            return false;
        }
        *state = to;
        true
    }

    pub(crate) fn attach(&self, kernel: Weak<Kernel>) {
        *write(&self.kernel) = kernel;
    }

    pub(crate) fn detach(&self) {
        *write(&self.kernel) = Weak::new();
    }

    pub(crate) fn hold_gating(&self, subscriptions: Vec<Subscription>) {
        self.gating
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(subscriptions);
    }

    /// Drop the gating subscriptions. Taken out of the lock before dropping,
    /// since dropping a subscription touches the kernel bus.
    pub(crate) fn release_gating(&self) {
        let released: Vec<Subscription> =
            std::mem::take(&mut *self.gating.lock().unwrap_or_else(|e| e.into_inner()));
        if !released.is_empty() {
            debug!(plugin = %self.name, count = released.len(), "gating released");
        }
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
    use {
        super::*,
        std::sync::atomic::AtomicUsize,
    };

    #[test]
    fn anonymous_names_are_generated() {
        let a = Plugin::anonymous();
        let b = Plugin::anonymous();
        assert!(a.name().starts_with("plugin-"));
        assert_ne!(a.name(), b.name());
    }

    #[test]
    fn new_plugin_is_enabled_and_unmounted() {
        let plugin = Plugin::new("p");
        assert_eq!(plugin.status(), PluginStatus::Enabled);
        assert_eq!(plugin.state(), MountState::Unmounted);
        assert!(!plugin.is_active());
        assert!(plugin.kernel().is_none());
    }

    #[test]
    fn services_keep_declaration_order_and_replace_in_place() {
        let plugin = Plugin::new("p");
        plugin.service("db", 1_u8).service("cache", 2_u8).service("db", 3_u8);
        let services = plugin.services();
        let names: Vec<&str> = services.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["db", "cache"]);
        let db = Arc::clone(&services[0].1).downcast::<u8>().unwrap();
        assert_eq!(*db, 3);
    }

    #[test]
    fn requirements_are_deduplicated() {
        let plugin = Plugin::new("p");
        plugin.require("db").require("db").require("cache");
        assert_eq!(plugin.required(), vec!["db", "cache"]);
        assert!(plugin.requires("cache"));
    }

    #[test]
    fn empty_allowlist_admits_everything() {
        let plugin = Plugin::new("p");
        assert!(plugin.admits("console"));
        plugin.adapters(["onebot"]);
        assert!(plugin.admits("onebot"));
        assert!(!plugin.admits("console"));
    }

    #[test]
    fn child_command_needs_registered_parent() {
        let plugin = Plugin::new("p");
        let child = Command::new("/帮助 插件").unwrap();
        assert!(matches!(
            plugin.command(child),
            Err(Error::UnknownParent { ref parent, .. }) if parent == "帮助"
        ));
        plugin.command(Command::new("/帮助").unwrap()).unwrap();
        plugin.command(Command::new("/帮助 插件").unwrap()).unwrap();
        assert_eq!(plugin.commands().len(), 2);
        assert_eq!(plugin.top_level_commands().len(), 1);
    }

    #[test]
    fn duplicate_command_in_same_plugin_is_rejected() {
        let plugin = Plugin::new("p");
        plugin.command(Command::new("/echo").unwrap()).unwrap();
        assert!(matches!(
            plugin.command(Command::new("/echo [text:string]").unwrap()),
            Err(Error::DuplicateCommand { .. })
        ));
    }

    #[test]
    fn all_hooks_run_and_first_error_is_reported() {
        let plugin = Plugin::new("p");
        let calls = Arc::new(AtomicUsize::new(0));
        let c1 = Arc::clone(&calls);
        let c2 = Arc::clone(&calls);
        plugin
            .on_mounted(move |_| {
                c1.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("first")
            })
            .on_mounted(move |_| {
                c2.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("second")
            });
        let err = plugin.run_hooks(LifecyclePhase::Mounted).unwrap_err();
        assert_eq!(err.to_string(), "first");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(plugin.run_hooks(LifecyclePhase::Unmounted).is_ok());
    }
}
