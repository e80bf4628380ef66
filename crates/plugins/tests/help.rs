#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::{Arc, Mutex};

use {
    async_trait::async_trait,
    kindle_channels::{Bot, MessageEvent, ReplyTarget, Scope},
    kindle_common::Reply,
    kindle_config::KindleConfig,
    kindle_kernel::{Command, Kernel, Plugin, SugarMapping},
    kindle_plugins::{command_parser::HELP_FOOTER, register_builtins},
    serde_json::Value,
};

#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl Bot for Outbox {
    fn self_id(&self) -> &str {
        "outbox"
    }

    async fn send(&self, _target: &ReplyTarget, reply: &Reply) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(reply.plain_text());
        Ok(())
    }
}

fn kernel() -> Arc<Kernel> {
    let kernel = Kernel::new(KindleConfig {
        plugin_dirs: Vec::new(),
        ..KindleConfig::default()
    });
    register_builtins(&kernel);
    for name in ["command-parser", "echo", "plugin-manager"] {
        kernel.load_plugin(name, &Value::Null).unwrap();
    }
    kernel
}

async fn ask(kernel: &Kernel, scope: Scope, text: &str) -> Option<String> {
    kernel
        .handle_message("console", Arc::new(Outbox::default()), MessageEvent::new(scope, "u1", text))
        .await
        .map(|reply| reply.plain_text())
}

async fn say(kernel: &Kernel, text: &str) -> Option<String> {
    ask(kernel, Scope::Private, text).await
}

#[tokio::test]
async fn echo_replies_through_command_parser() {
    let kernel = kernel();
    assert_eq!(say(&kernel, "/echo hello  world").await.as_deref(), Some("hello world"));
    assert_eq!(say(&kernel, "/echo \"two words\"").await.as_deref(), Some("two words"));
    assert_eq!(say(&kernel, "echo hello").await, None);
}

#[tokio::test]
async fn bare_help_lists_top_level_commands() {
    let kernel = kernel();
    let text = say(&kernel, "/帮助").await.unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines, vec![
        "/帮助 [name:string]  显示指令帮助",
        "/echo [...text:string]  复读消息",
        "/插件列表  列出已加载的插件",
        "/启用插件 [name:string]  启用插件",
        "/禁用插件 [name:string]  禁用插件",
        HELP_FOOTER,
    ]);
}

#[tokio::test]
async fn sugar_matches_explicit_form() {
    let kernel = kernel();
    let sugared = say(&kernel, "echo帮助").await.unwrap();
    let explicit = say(&kernel, "/帮助 echo").await.unwrap();
    assert_eq!(sugared, explicit);
    assert!(sugared.starts_with("  /echo [...text:string]  复读消息"));
    assert!(sugared.ends_with(HELP_FOOTER));
}

#[tokio::test]
async fn help_by_alias_shows_details() {
    let kernel = kernel();
    let text = say(&kernel, "help 帮助").await.unwrap();
    assert!(text.contains("    alias: help"));
    assert!(text.contains("-H [showHidden:boolean]"));
}

#[tokio::test]
async fn help_for_unknown_command() {
    let kernel = kernel();
    assert_eq!(say(&kernel, "/帮助 天气").await.as_deref(), Some("unknown command: 天气"));
}

#[tokio::test]
async fn hidden_commands_need_the_flag() {
    let kernel = kernel();
    let debug = Plugin::new("debug");
    debug
        .command(Command::new("/调试").unwrap().desc("内部").hidden(true))
        .unwrap();
    kernel.mount(debug).unwrap();

    assert!(!say(&kernel, "/帮助").await.unwrap().contains("/调试"));
    assert!(say(&kernel, "/帮助 -H").await.unwrap().contains("/调试  内部"));
}

#[tokio::test]
async fn children_appear_under_their_parent() {
    let kernel = kernel();
    let weather = Plugin::new("weather");
    weather
        .command(Command::new("/天气").unwrap().desc("天气查询"))
        .unwrap()
        .command(Command::new("/天气 明天").unwrap().desc("明日预报"))
        .unwrap();
    kernel.mount(weather).unwrap();

    let summary = say(&kernel, "/帮助").await.unwrap();
    assert!(summary.contains("/天气  天气查询\n  /天气 明天  明日预报"));
    // a command without an action answers with its own help
    let group = say(&kernel, "/天气").await.unwrap();
    assert_eq!(group, "/天气  天气查询\n  /天气 明天  明日预报");
}

#[tokio::test]
async fn plugin_manager_toggles_in_direct_scope_only() {
    let kernel = kernel();
    assert_eq!(
        say(&kernel, "/插件列表").await.as_deref(),
        Some("1 command-parser(已启用)\n2 echo(已启用)\n3 plugin-manager(已启用)")
    );

    assert_eq!(say(&kernel, "/禁用插件 echo").await, None);
    assert_eq!(ask(&kernel, Scope::Direct, "/禁用插件 echo").await.as_deref(), Some("插件已禁用"));
    assert_eq!(say(&kernel, "/echo hi").await, None);
    assert!(say(&kernel, "/插件列表").await.unwrap().contains("2 echo(已禁用)"));

    assert_eq!(ask(&kernel, Scope::Direct, "/启用插件 echo").await.as_deref(), Some("插件已启用"));
    assert_eq!(say(&kernel, "/echo hi").await.as_deref(), Some("hi"));

    assert_eq!(ask(&kernel, Scope::Direct, "/启用插件 ghost").await.as_deref(), Some("该插件不存在"));
    assert_eq!(ask(&kernel, Scope::Direct, "/禁用插件 ghost").await.as_deref(), Some("插件不存在"));
}

#[tokio::test]
async fn help_child_is_listed_under_help() {
    let kernel = kernel();
    let parser = kernel.plugin("command-parser").unwrap();
    parser
        .command(
            Command::new("/帮助 插件")
                .unwrap()
                .desc("插件相关帮助")
                .action(|_ctx, _args| async move { Ok(Some(Reply::text("插件可以用 /插件列表 查看"))) }),
        )
        .unwrap();

    let text = say(&kernel, "/帮助").await.unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(&lines[..2], &[
        "/帮助 [name:string]  显示指令帮助",
        "  /帮助 插件  插件相关帮助",
    ]);
    assert_eq!(lines.last(), Some(&HELP_FOOTER));

    assert_eq!(say(&kernel, "/帮助 插件").await.as_deref(), Some("插件可以用 /插件列表 查看"));
    assert_eq!(say(&kernel, "插件帮助").await.as_deref(), Some("插件可以用 /插件列表 查看"));
}

#[tokio::test]
async fn failing_command_does_not_block_later_commands() {
    let kernel = kernel();
    let first = Plugin::new("a");
    first
        .command(
            Command::new("/a")
                .unwrap()
                .sugar("^hello$", SugarMapping::default())
                .unwrap()
                .action(|_ctx, _args| async move {
                    Err::<Option<Reply>, _>(anyhow::anyhow!("a is broken"))
                }),
        )
        .unwrap();
    let second = Plugin::new("b");
    second
        .command(
            Command::new("/b")
                .unwrap()
                .sugar("^hello$", SugarMapping::default())
                .unwrap()
                .action(|_ctx, _args| async move { Ok(Some(Reply::text("from b"))) }),
        )
        .unwrap();
    kernel.mount(first).unwrap();
    kernel.mount(second).unwrap();

    assert_eq!(say(&kernel, "hello").await.as_deref(), Some("from b"));
}
