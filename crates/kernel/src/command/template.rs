//! Command and option template grammar.
//!
//! ```text
//! command := [prefix]name (sub)* decl*
//! decl    := "<" ["..."] name [":" type] ">" | "[" ["..."] name [":" type] "]"
//! option  := "-"flag [decl] description*
//! ```

use std::fmt;

use serde_json::Value;

use crate::{Error, Result};

/// Value type of an argument or option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    String,
    Number,
    Boolean,
}

impl ArgType {
    fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "string" | "str" | "text" => Some(Self::String),
            "number" | "int" | "integer" | "float" => Some(Self::Number),
            "boolean" | "bool" => Some(Self::Boolean),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
        }
    }

    /// Convert a raw token into a typed value.
    pub fn convert(&self, raw: &str) -> std::result::Result<Value, String> {
        match self {
            Self::String => Ok(Value::String(raw.to_string())),
            Self::Number => {
                if let Ok(n) = raw.parse::<i64>() {
                    return Ok(Value::from(n));
                }
                raw.parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| format!("expected a number, got '{raw}'"))
            },
            Self::Boolean => parse_bool(raw)
                .map(Value::Bool)
                .ok_or_else(|| format!("expected a boolean, got '{raw}'")),
        }
    }
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// One declared positional argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgSpec {
    pub name: String,
    pub ty: ArgType,
    pub required: bool,
    /// Collects every remaining token.
    pub variadic: bool,
}

impl fmt::Display for ArgSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (open, close) = if self.required { ('<', '>') } else { ('[', ']') };
        let dots = if self.variadic { "..." } else { "" };
        write!(f, "{open}{dots}{}:{}{close}", self.name, self.ty)
    }
}

fn is_decl(token: &str) -> bool {
    token.starts_with('<') || token.starts_with('[')
}

/// Parse a `<name:type>` / `[name:type]` / `[...name:type]` token.
fn parse_decl(token: &str) -> std::result::Result<ArgSpec, String> {
    let (required, inner) = if let Some(inner) = token.strip_prefix('<') {
        (true, inner.strip_suffix('>'))
    } else if let Some(inner) = token.strip_prefix('[') {
        (false, inner.strip_suffix(']'))
    } else {
        (false, None)
    };
    let inner = inner.ok_or_else(|| format!("malformed argument '{token}'"))?;
    let (variadic, inner) = match inner.strip_prefix("...") {
        Some(rest) => (true, rest),
        None => (false, inner),
    };
    let (name, ty) = inner.split_once(':').unwrap_or((inner, ""));
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("argument '{token}' has no name"));
    }
    let ty = ArgType::parse(ty).ok_or_else(|| format!("unknown type '{ty}' in '{token}'"))?;
    Ok(ArgSpec {
        name: name.to_string(),
        ty,
        required,
        variadic,
    })
}

/// Parsed `[prefix]name sub... decl...` template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Template {
    pub prefix: String,
    pub path: Vec<String>,
    pub args: Vec<ArgSpec>,
}

pub(crate) fn parse_command(template: &str) -> Result<Template> {
    let invalid = |reason: String| Error::invalid_template(template, reason);
    let tokens: Vec<&str> = template.split_whitespace().collect();
    let split = tokens
        .iter()
        .position(|t| is_decl(t))
        .unwrap_or(tokens.len());
    let (words, decls) = tokens.split_at(split);

    let Some((head, subs)) = words.split_first() else {
        return Err(invalid("missing command name".into()));
    };
    let prefix: String = head.chars().take_while(char::is_ascii_punctuation).collect();
    let name = &head[prefix.len()..];
    if name.is_empty() {
        return Err(invalid("missing command name".into()));
    }
    let mut path = vec![name.to_string()];
    for sub in subs {
        if sub.starts_with(|c: char| c.is_ascii_punctuation()) {
            return Err(invalid(format!("subcommand '{sub}' must not carry a prefix")));
        }
        path.push((*sub).to_string());
    }

    let mut args = Vec::with_capacity(decls.len());
    for decl in decls {
        if args.last().is_some_and(|a: &ArgSpec| a.variadic) {
            return Err(invalid("a variadic argument must come last".into()));
        }
        let spec = parse_decl(decl).map_err(invalid)?;
        if spec.required && args.iter().any(|a: &ArgSpec| !a.required) {
            return Err(invalid(format!(
                "required argument '{}' follows an optional one",
                spec.name
            )));
        }
        args.push(spec);
    }

    Ok(Template { prefix, path, args })
}

/// One declared `-flag` option.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionSpec {
    /// Flag without leading dashes.
    pub flag: String,
    /// Key the value is stored under.
    pub name: String,
    pub ty: ArgType,
    /// Declaration as written, e.g. `[showHidden:boolean]`; empty for bare flags.
    pub decl: String,
    pub description: String,
    pub default: Option<Value>,
}

impl OptionSpec {
    pub(crate) fn parse(template: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::invalid_template(template, reason);
        let mut tokens = template.split_whitespace().peekable();
        let flag = tokens
            .next()
            .and_then(|t| t.strip_prefix('-'))
            .map(|t| t.trim_start_matches('-'))
            .filter(|f| !f.is_empty())
            .ok_or_else(|| invalid("an option starts with -flag"))?
            .to_string();

        let (name, ty, decl) = match tokens.next_if(|t| is_decl(t)) {
            Some(decl) => {
                let spec = parse_decl(decl).map_err(|e| Error::invalid_template(template, e))?;
                if spec.variadic {
                    return Err(invalid("options cannot be variadic"));
                }
                (spec.name, spec.ty, decl.to_string())
            },
            None => (flag.clone(), ArgType::Boolean, String::new()),
        };

        Ok(Self {
            flag,
            name,
            ty,
            decl,
            description: tokens.collect::<Vec<_>>().join(" "),
            default: None,
        })
    }

    pub(crate) fn matches(&self, token: &str) -> bool {
        if let Some(long) = token.strip_prefix("--") {
            return long == self.name || long == self.flag;
        }
        token.strip_prefix('-') == Some(self.flag.as_str())
    }

    /// `-H [showHidden:boolean] description`
    pub fn usage(&self) -> String {
        let mut line = format!("-{}", self.flag);
        for part in [&self.decl, &self.description] {
            if !part.is_empty() {
                line.push(' ');
                line.push_str(part);
            }
        }
        line
    }
}
