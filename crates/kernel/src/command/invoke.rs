use serde_json::{Map, Value};

use super::template::{ArgSpec, ArgType, OptionSpec, parse_bool};

/// Split on whitespace; double quotes group words and may produce empty tokens.
pub fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut quoted = false;

    for ch in input.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                quoted = true;
            },
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() || quoted {
                    tokens.push(std::mem::take(&mut current));
                }
                quoted = false;
            },
            c => current.push(c),
        }
    }
    if !current.is_empty() || quoted {
        tokens.push(current);
    }
    tokens
}

/// Positional values and options bound from the tokens after the trigger.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Invocation {
    pub args: Vec<Value>,
    pub options: Map<String, Value>,
}

/// Bind `tokens` against the declared arguments and options.
///
/// A `None` token is an empty positional slot (left by a sugar capture that
/// matched nothing) and binds as if the argument were omitted.
pub(crate) fn bind(
    tokens: &[Option<String>],
    specs: &[ArgSpec],
    option_specs: &[OptionSpec],
) -> Result<Invocation, String> {
    let mut options = Map::new();
    let mut positionals: Vec<Option<&str>> = Vec::new();
    let mut iter = tokens.iter().map(Option::as_deref).peekable();

    while let Some(slot) = iter.next() {
        let Some(token) = slot else {
            positionals.push(None);
            continue;
        };
        if token == "--" {
            positionals.extend(iter.by_ref());
            break;
        }
        let Some(spec) = option_specs.iter().find(|o| o.matches(token)) else {
            positionals.push(Some(token));
            continue;
        };
        let value = if spec.ty == ArgType::Boolean {
            match iter.peek().copied().flatten().and_then(parse_bool) {
                Some(explicit) => {
                    iter.next();
                    Value::Bool(explicit)
                },
                None => Value::Bool(true),
            }
        } else {
            let raw = iter
                .next()
                .flatten()
                .ok_or_else(|| format!("option -{} expects a {} value", spec.flag, spec.ty))?;
            spec.ty
                .convert(raw)
                .map_err(|e| format!("option -{}: {e}", spec.flag))?
        };
        options.insert(spec.name.clone(), value);
    }

    for spec in option_specs {
        if let Some(default) = &spec.default
            && !options.contains_key(&spec.name)
        {
            options.insert(spec.name.clone(), default.clone());
        }
    }

    let mut args = Vec::with_capacity(specs.len());
    for (index, spec) in specs.iter().enumerate() {
        if spec.variadic {
            let rest: Vec<&str> = positionals
                .get(index..)
                .unwrap_or_default()
                .iter()
                .flatten()
                .copied()
                .collect();
            if spec.required && rest.is_empty() {
                return Err(format!("missing required argument {spec}"));
            }
            let values = rest
                .iter()
                .map(|raw| spec.ty.convert(raw))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| format!("argument {spec}: {e}"))?;
            args.push(Value::Array(values));
            break;
        }
        match positionals.get(index).copied().flatten() {
            Some(raw) => args.push(
                spec.ty
                    .convert(raw)
                    .map_err(|e| format!("argument {spec}: {e}"))?,
            ),
            None if spec.required => return Err(format!("missing required argument {spec}")),
            None => args.push(Value::Null),
        }
    }

    Ok(Invocation { args, options })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::command::template::parse_command,
        rstest::rstest,
        serde_json::json,
    };

    fn tokens(s: &str) -> Vec<Option<String>> {
        tokenize(s).into_iter().map(Some).collect()
    }

    #[rstest]
    #[case("/echo  hello   world", &["/echo", "hello", "world"])]
    #[case(r#"/echo "hello world" x"#, &["/echo", "hello world", "x"])]
    #[case(r#"/set key """#, &["/set", "key", ""])]
    #[case("   ", &[])]
    fn tokenizes(#[case] input: &str, #[case] expected: &[&str]) {
        assert_eq!(tokenize(input), expected);
    }

    #[test]
    fn binds_positionals_in_order() {
        let t = parse_command("/add <a:number> <b:number> [note]").unwrap();
        let inv = bind(&tokens("1 2.5"), &t.args, &[]).unwrap();
        assert_eq!(inv.args, vec![json!(1), json!(2.5), Value::Null]);
    }

    #[test]
    fn variadic_collects_the_rest() {
        let t = parse_command("/echo [...text]").unwrap();
        let inv = bind(&tokens("a b c"), &t.args, &[]).unwrap();
        assert_eq!(inv.args, vec![json!(["a", "b", "c"])]);
        let empty = bind(&[], &t.args, &[]).unwrap();
        assert_eq!(empty.args, vec![json!([])]);
    }

    #[test]
    fn missing_required_argument_is_reported() {
        let t = parse_command("/enable <name>").unwrap();
        let err = bind(&[], &t.args, &[]).unwrap_err();
        assert_eq!(err, "missing required argument <name:string>");
    }

    #[test]
    fn type_errors_are_reported() {
        let t = parse_command("/roll <sides:number>").unwrap();
        let err = bind(&tokens("many"), &t.args, &[]).unwrap_err();
        assert!(err.contains("expected a number"));
    }

    #[test]
    fn boolean_options_take_an_optional_literal() {
        let t = parse_command("/帮助 [name]").unwrap();
        let opts = vec![OptionSpec::parse("-H [showHidden:boolean]").unwrap()];

        let inv = bind(&tokens("-H 插件"), &t.args, &opts).unwrap();
        assert_eq!(inv.options["showHidden"], json!(true));
        assert_eq!(inv.args, vec![json!("插件")]);

        let inv = bind(&tokens("插件 -H false"), &t.args, &opts).unwrap();
        assert_eq!(inv.options["showHidden"], json!(false));
    }

    #[test]
    fn valued_options_and_defaults() {
        let t = parse_command("/list").unwrap();
        let mut page = OptionSpec::parse("-p <page:number> page").unwrap();
        page.default = Some(json!(1));
        let opts = vec![page];

        let inv = bind(&[], &t.args, &opts).unwrap();
        assert_eq!(inv.options["page"], json!(1));

        let inv = bind(&tokens("-p 3"), &t.args, &opts).unwrap();
        assert_eq!(inv.options["page"], json!(3));

        assert!(bind(&tokens("-p"), &t.args, &opts).is_err());
    }

    #[test]
    fn double_dash_ends_options() {
        let t = parse_command("/echo [...text]").unwrap();
        let opts = vec![OptionSpec::parse("-H").unwrap()];
        let inv = bind(&tokens("-- -H"), &t.args, &opts).unwrap();
        assert_eq!(inv.args, vec![json!(["-H"])]);
        assert!(inv.options.is_empty());
    }

    #[test]
    fn empty_slots_keep_later_arguments_in_place() {
        let t = parse_command("/add [x] [y]").unwrap();
        let inv = bind(&[None, Some("5".to_string())], &t.args, &[]).unwrap();
        assert_eq!(inv.args, vec![Value::Null, json!("5")]);
    }
}
