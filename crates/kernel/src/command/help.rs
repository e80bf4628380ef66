use std::sync::Arc;

use super::Command;

/// How much of a command tree [`Command::help`] renders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HelpOptions {
    /// Include hidden children.
    pub show_hidden: bool,
    /// Usage and description only; no alias or option lines.
    pub simple: bool,
    /// Indentation level of the first line.
    pub depth: usize,
}

impl Command {
    /// Render this command and its children as lines, children indented one
    /// level deeper.
    pub fn help(&self, options: &HelpOptions, commands: &[Arc<Command>]) -> Vec<String> {
        let indent = "  ".repeat(options.depth);
        let mut lines = Vec::new();

        let mut head = format!("{indent}{}", self.usage());
        if !self.description.is_empty() {
            head.push_str("  ");
            head.push_str(&self.description);
        }
        lines.push(head);

        if !options.simple {
            if !self.aliases.is_empty() {
                lines.push(format!("{indent}  alias: {}", self.aliases.join(", ")));
            }
            for option in &self.options {
                lines.push(format!("{indent}  {}", option.usage()));
            }
        }

        let nested = HelpOptions {
            depth: options.depth + 1,
            ..*options
        };
        for child in self.children(commands) {
            if child.hidden && !options.show_hidden {
                continue;
            }
            lines.extend(child.help(&nested, commands));
        }
        lines
    }
}
