use {
    kindle_common::Reply,
    kindle_kernel::{Command, CommandContext, Plugin},
    serde_json::Value,
};

pub const NAME: &str = "echo";

pub fn plugin(_options: &Value) -> anyhow::Result<Plugin> {
    let echo = Command::new("/echo [...text:string]")?
        .desc("复读消息")
        .action(|_ctx: CommandContext, args: Vec<Value>| async move {
            let words: Vec<&str> = args
                .first()
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(Value::as_str)
                .collect();
            if words.is_empty() {
                return Ok(None);
            }
            Ok(Some(Reply::text(words.join(" "))))
        });

    let plugin = Plugin::new(NAME);
    plugin.describe("复读");
    plugin.command(echo)?;
    Ok(plugin)
}
