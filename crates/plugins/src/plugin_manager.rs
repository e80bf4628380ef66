use {
    kindle_channels::Scope,
    kindle_common::Reply,
    kindle_kernel::{Command, CommandContext, MountState, Plugin, PluginStatus},
    serde_json::Value,
};

pub const NAME: &str = "plugin-manager";

fn status_text(plugin: &Plugin) -> &'static str {
    match (plugin.status(), plugin.state()) {
        (PluginStatus::Disabled, _) => "已禁用",
        (PluginStatus::Enabled, MountState::Mounted) => "已启用",
        (PluginStatus::Enabled, _) => "等待服务",
    }
}

fn list_command() -> kindle_kernel::Result<Command> {
    Ok(Command::new("/插件列表")?
        .scope(Scope::ALL.iter().copied())
        .desc("列出已加载的插件")
        .action(|ctx: CommandContext, _args: Vec<Value>| async move {
            let lines: Vec<String> = ctx
                .kernel()
                .plugins()
                .iter()
                .enumerate()
                .map(|(i, plugin)| format!("{} {}({})", i + 1, plugin.name(), status_text(plugin)))
                .collect();
            Ok(Some(Reply::text(lines.join("\n"))))
        }))
}

fn enable_command() -> kindle_kernel::Result<Command> {
    Ok(Command::new("/启用插件 [name:string]")?
        .scope([Scope::Direct])
        .desc("启用插件")
        .action(|ctx: CommandContext, args: Vec<Value>| async move {
            let name = args.first().and_then(Value::as_str).unwrap_or_default();
            let text = match ctx.kernel().enable(name) {
                Ok(()) => "插件已启用",
                Err(_) => "该插件不存在",
            };
            Ok(Some(Reply::text(text)))
        }))
}

fn disable_command() -> kindle_kernel::Result<Command> {
    Ok(Command::new("/禁用插件 [name:string]")?
        .scope([Scope::Direct])
        .desc("禁用插件")
        .action(|ctx: CommandContext, args: Vec<Value>| async move {
            let name = args.first().and_then(Value::as_str).unwrap_or_default();
            let text = match ctx.kernel().disable(name) {
                Ok(()) => "插件已禁用",
                Err(_) => "插件不存在",
            };
            Ok(Some(Reply::text(text)))
        }))
}

pub fn plugin(_options: &Value) -> anyhow::Result<Plugin> {
    let plugin = Plugin::new(NAME);
    plugin.describe("插件管理");
    plugin
        .command(list_command()?)?
        .command(enable_command()?)?
        .command(disable_command()?)?;
    Ok(plugin)
}
