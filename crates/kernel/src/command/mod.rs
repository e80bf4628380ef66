//! Commands: templated triggers with typed arguments, layered on middlewares.
//!
//! A [`Command`] is built from a template such as
//! `/帮助 [name:string]` and refined with builder calls. Commands form a tree
//! through their path: `/帮助 插件` is a child of `/帮助`.

mod help;
mod invoke;
mod template;

use std::{fmt, future::Future, sync::Arc};

use {
    futures::future::BoxFuture,
    kindle_channels::{Bot, MessageEvent, Scope},
    kindle_common::Reply,
    regex::Regex,
    serde_json::{Map, Value},
    tracing::debug,
};

pub use {
    help::HelpOptions,
    invoke::tokenize,
    template::{ArgSpec, ArgType, OptionSpec},
};

use crate::{Result, kernel::Kernel, middleware::MessageContext};

pub type Action =
    Arc<dyn Fn(CommandContext, Vec<Value>) -> BoxFuture<'static, anyhow::Result<Option<Reply>>> + Send + Sync>;

pub type Permission = Arc<dyn Fn(&MessageContext) -> bool + Send + Sync>;

/// What a command action receives besides its positional values.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub message: Arc<MessageContext>,
    /// Options by name, defaults filled in.
    pub options: Map<String, Value>,
}

impl CommandContext {
    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.message.kernel
    }

    pub fn event(&self) -> &MessageEvent {
        &self.message.event
    }

    pub fn bot(&self) -> &Arc<dyn Bot> {
        &self.message.bot
    }

    pub fn adapter(&self) -> &str {
        &self.message.adapter
    }

    pub fn option(&self, name: &str) -> Option<&Value> {
        self.options.get(name)
    }

    /// Boolean option, `false` when absent.
    pub fn flag(&self, name: &str) -> bool {
        self.options
            .get(name)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Argument and option mapping applied when a sugar pattern matches.
///
/// Values may reference capture groups as `$1` or `${name}`.
#[derive(Debug, Clone, Default)]
pub struct SugarMapping {
    args: Vec<String>,
    options: Vec<(String, String)>,
}

impl SugarMapping {
    pub fn args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            options: Vec::new(),
        }
    }

    #[must_use]
    pub fn option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.push((name.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone)]
struct Sugar {
    pattern: Regex,
    mapping: SugarMapping,
}

pub struct Command {
    template: String,
    prefix: String,
    path: Vec<String>,
    args: Vec<ArgSpec>,
    options: Vec<OptionSpec>,
    aliases: Vec<String>,
    sugars: Vec<Sugar>,
    scopes: Vec<Scope>,
    description: String,
    hidden: bool,
    permission: Option<Permission>,
    action: Option<Action>,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("template", &self.template)
            .field("aliases", &self.aliases)
            .field("scopes", &self.scopes)
            .field("hidden", &self.hidden)
            .finish_non_exhaustive()
    }
}

impl Command {
    pub fn new(template: &str) -> Result<Self> {
        let parsed = template::parse_command(template)?;
        Ok(Self {
            template: template.trim().to_string(),
            prefix: parsed.prefix,
            path: parsed.path,
            args: parsed.args,
            options: Vec::new(),
            aliases: Vec::new(),
            sugars: Vec::new(),
            scopes: Vec::new(),
            description: String::new(),
            hidden: false,
            permission: None,
            action: None,
        })
    }

    // ── Builder ─────────────────────────────────────────────────────────────

    /// Restrict the command to the given scopes. Without a call every scope
    /// is accepted.
    #[must_use]
    pub fn scope(mut self, scopes: impl IntoIterator<Item = Scope>) -> Self {
        self.scopes = scopes.into_iter().collect();
        self
    }

    #[must_use]
    pub fn desc(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Accept free-form text matching `pattern` as an invocation.
    pub fn sugar(mut self, pattern: &str, mapping: SugarMapping) -> Result<Self> {
        self.sugars.push(Sugar {
            pattern: Regex::new(pattern)?,
            mapping,
        });
        Ok(self)
    }

    /// Declare an option, e.g. `-H [showHidden:boolean] show hidden commands`.
    pub fn option(mut self, template: &str) -> Result<Self> {
        self.options.push(OptionSpec::parse(template)?);
        Ok(self)
    }

    /// Default value for the option named `name` (or with flag `name`).
    #[must_use]
    pub fn option_default(mut self, name: &str, value: impl Into<Value>) -> Self {
        match self
            .options
            .iter_mut()
            .find(|o| o.name == name || o.flag == name)
        {
            Some(option) => option.default = Some(value.into()),
            None => debug!(command = %self.template, option = name, "default for undeclared option ignored"),
        }
        self
    }

    #[must_use]
    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    #[must_use]
    pub fn permission<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&MessageContext) -> bool + Send + Sync + 'static,
    {
        self.permission = Some(Arc::new(predicate));
        self
    }

    #[must_use]
    pub fn action<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(CommandContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<Reply>>> + Send + 'static,
    {
        let action: Action = Arc::new(
            move |ctx: CommandContext,
                  args: Vec<Value>|
                  -> BoxFuture<'static, anyhow::Result<Option<Reply>>> {
                Box::pin(f(ctx, args))
            },
        );
        self.action = Some(action);
        self
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    pub fn name(&self) -> &str {
        self.path.last().map_or("", String::as_str)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Dotted path, e.g. `帮助.插件`.
    pub fn qualified_name(&self) -> String {
        self.path.join(".")
    }

    pub fn parent(&self) -> Option<String> {
        (self.path.len() > 1).then(|| self.path[..self.path.len() - 1].join("."))
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn options(&self) -> &[OptionSpec] {
        &self.options
    }

    pub fn args(&self) -> &[ArgSpec] {
        &self.args
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn accepts_scope(&self, scope: Scope) -> bool {
        self.scopes.is_empty() || self.scopes.contains(&scope)
    }

    /// Usage line: full path followed by argument declarations.
    pub fn usage(&self) -> String {
        let mut usage = format!("{}{}", self.prefix, self.path.join(" "));
        for arg in &self.args {
            usage.push(' ');
            usage.push_str(&arg.to_string());
        }
        usage
    }

    /// Whether `token` invokes this command at its own level of the tree.
    pub fn triggered_by(&self, token: &str) -> bool {
        let name = self.name();
        let local = if self.parent().is_some() || self.prefix.is_empty() {
            token == name
        } else {
            token.strip_prefix(self.prefix.as_str()) == Some(name)
        };
        local
            || self.aliases.iter().any(|alias| {
                token == alias || token.strip_prefix(self.prefix.as_str()) == Some(alias.as_str())
            })
    }

    /// Whether `name` refers to this command by dotted path, trigger or alias.
    pub fn answers_to(&self, name: &str) -> bool {
        name == self.qualified_name()
            || (self.parent().is_none() && self.triggered_by(name))
    }

    fn children<'a>(&self, commands: &'a [Arc<Command>]) -> impl Iterator<Item = &'a Arc<Command>> {
        let qualified = self.qualified_name();
        commands
            .iter()
            .filter(move |c| c.parent().as_deref() == Some(qualified.as_str()))
    }

    // ── Execution ───────────────────────────────────────────────────────────

    /// Try to handle the message in `ctx`.
    ///
    /// `Ok(None)` means the message is not for this command. `commands` is the
    /// pool children are resolved from, normally every active command.
    pub async fn execute(
        &self,
        ctx: &Arc<MessageContext>,
        commands: &[Arc<Command>],
    ) -> anyhow::Result<Option<Reply>> {
        if !self.accepts_scope(ctx.event.scope) {
            return Ok(None);
        }
        let raw = ctx.event.raw_message.trim();
        let tokens = tokenize(raw);
        let Some((head, tail)) = tokens.split_first() else {
            return Ok(None);
        };
        let rest = if self.triggered_by(head) {
            tail.iter().cloned().map(Some).collect()
        } else {
            match self.desugar(raw) {
                Some(rewritten) => {
                    debug!(command = %self.qualified_name(), raw, "sugar matched");
                    rewritten
                },
                None => return Ok(None),
            }
        };
        if !self.permitted(ctx) {
            return Ok(None);
        }
        self.run_tokens(ctx, &rest, commands).await
    }

    fn permitted(&self, ctx: &MessageContext) -> bool {
        let allowed = self.permission.as_ref().is_none_or(|p| p(ctx));
        if !allowed {
            debug!(
                command = %self.qualified_name(),
                user_id = %ctx.event.sender.user_id,
                "permission denied"
            );
        }
        allowed
    }

    fn run_tokens<'a>(
        &'a self,
        ctx: &'a Arc<MessageContext>,
        rest: &'a [Option<String>],
        commands: &'a [Arc<Command>],
    ) -> BoxFuture<'a, anyhow::Result<Option<Reply>>> {
        Box::pin(async move {
            if let Some((Some(head), tail)) = rest.split_first() {
                let child = self
                    .children(commands)
                    .find(|c| c.triggered_by(head) && c.accepts_scope(ctx.event.scope));
                if let Some(child) = child {
                    if !child.permitted(ctx) {
                        return Ok(None);
                    }
                    return child.run_tokens(ctx, tail, commands).await;
                }
            }

            let Some(action) = self.action.clone() else {
                let lines = self.help(&HelpOptions::default(), commands);
                return Ok(Some(Reply::text(lines.join("\n"))));
            };

            let invocation = match invoke::bind(rest, &self.args, &self.options) {
                Ok(invocation) => invocation,
                Err(problem) => {
                    debug!(command = %self.qualified_name(), %problem, "invalid invocation");
                    return Ok(Some(Reply::text(format!("{problem}\nusage: {}", self.usage()))));
                },
            };
            let context = CommandContext {
                message: Arc::clone(ctx),
                options: invocation.options,
            };
            action(context, invocation.args).await
        })
    }

    /// Rewrite `raw` through the first matching sugar into the slots that
    /// follow the trigger. A mapped argument whose captures are empty stays
    /// as an empty slot so later arguments keep their positions.
    fn desugar(&self, raw: &str) -> Option<Vec<Option<String>>> {
        self.sugars.iter().find_map(|sugar| {
            let captures = sugar.pattern.captures(raw)?;
            let expand = |template: &str| {
                let mut out = String::new();
                captures.expand(template, &mut out);
                out
            };

            let mut slots: Vec<Option<String>> = sugar
                .mapping
                .args
                .iter()
                .map(|a| Some(expand(a.as_str())).filter(|v| !v.is_empty()))
                .collect();
            while slots.last().is_some_and(Option::is_none) {
                slots.pop();
            }
            for (name, value) in &sugar.mapping.options {
                let value = expand(value.as_str());
                let flag = self
                    .options
                    .iter()
                    .find(|o| o.name == *name || o.flag == *name)
                    .map_or_else(|| format!("--{name}"), |o| format!("-{}", o.flag));
                slots.push(Some(flag));
                if !value.is_empty() {
                    slots.push(Some(value));
                }
            }
            Some(slots)
        })
    }
}
