//! Routes messages to commands and provides `/帮助`.

use std::sync::Arc;

use {
    async_trait::async_trait,
    kindle_channels::Scope,
    kindle_common::Reply,
    kindle_kernel::{
        Command, CommandContext, HelpOptions, MessageContext, Middleware, Next, Plugin,
        SugarMapping,
    },
    serde_json::Value,
    tracing::{debug, warn},
};

pub const NAME: &str = "command-parser";

pub const HELP_FOOTER: &str = "输入 “/帮助 [command name]” 展示指定指令帮助";

/// Offers the message to every supported top-level command; the first one
/// that answers wins.
struct CommandMiddleware;

#[async_trait]
impl Middleware for CommandMiddleware {
    fn name(&self) -> &str {
        "commands"
    }

    async fn handle(&self, ctx: Arc<MessageContext>, next: Next) -> anyhow::Result<Option<Reply>> {
        let pool = ctx.kernel.commands();
        for command in ctx.kernel.supported_commands(&ctx.adapter) {
            let answer = match command.execute(&ctx, &pool).await {
                Ok(answer) => answer,
                Err(e) => {
                    warn!(command = %command.qualified_name(), adapter = %ctx.adapter, error = %e, "command failed");
                    continue;
                },
            };
            if let Some(reply) = answer
                && !reply.is_empty()
            {
                debug!(command = %command.qualified_name(), adapter = %ctx.adapter, "command answered");
                return Ok(Some(reply));
            }
        }
        Ok(next.run(ctx).await)
    }
}

fn help_text(ctx: &CommandContext, target: Option<&str>) -> String {
    let kernel = ctx.kernel();
    let pool = kernel.commands();
    let show_hidden = ctx.flag("showHidden");

    let mut lines = match target {
        None => {
            let summary = HelpOptions {
                show_hidden,
                simple: true,
                depth: 0,
            };
            kernel
                .supported_commands(ctx.adapter())
                .iter()
                .filter(|c| show_hidden || !c.is_hidden())
                .flat_map(|c| c.help(&summary, &pool))
                .collect::<Vec<_>>()
        },
        Some(target) => match kernel.find_command(target) {
            Some(command) => command.help(
                &HelpOptions {
                    show_hidden,
                    simple: false,
                    depth: 1,
                },
                &pool,
            ),
            None => return format!("unknown command: {target}"),
        },
    };
    lines.retain(|line| !line.trim().is_empty());
    lines.push(HELP_FOOTER.to_string());
    lines.join("\n")
}

fn help_command() -> kindle_kernel::Result<Command> {
    Ok(Command::new("/帮助 [name:string]")?
        .scope(Scope::ALL.iter().copied())
        .desc("显示指令帮助")
        .alias("help")
        .sugar(r"^(\S+)帮助$", SugarMapping::args(["$1"]))?
        .option("-H [showHidden:boolean] 显示隐藏指令")?
        .action(|ctx: CommandContext, args: Vec<Value>| async move {
            let target = args.first().and_then(Value::as_str);
            Ok(Some(Reply::text(help_text(&ctx, target))))
        }))
}

pub fn plugin(_options: &Value) -> anyhow::Result<Plugin> {
    let plugin = Plugin::new(NAME);
    plugin
        .describe("指令解析器")
        .middleware(Arc::new(CommandMiddleware));
    plugin.command(help_command()?)?;
    Ok(plugin)
}
