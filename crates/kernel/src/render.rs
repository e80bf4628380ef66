use std::sync::Arc;

use kindle_channels::MessageEvent;

/// Transforms outgoing reply text before it is sent.
pub trait Render: Send + Sync {
    fn render(&self, template: &str, event: Option<&MessageEvent>) -> anyhow::Result<String>;
}

impl<F> Render for F
where
    F: Fn(&str, Option<&MessageEvent>) -> anyhow::Result<String> + Send + Sync,
{
    fn render(&self, template: &str, event: Option<&MessageEvent>) -> anyhow::Result<String> {
        self(template, event)
    }
}

/// Handle returned by [`crate::Kernel::register_render`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderId(pub(crate) u64);

/// Apply `renders` in order. A failing render is reported through
/// `on_error` and skipped; the text it received carries on.
pub(crate) fn apply(
    renders: &[Arc<dyn Render>],
    template: &str,
    event: Option<&MessageEvent>,
    mut on_error: impl FnMut(usize, anyhow::Error),
) -> String {
    let mut text = template.to_string();
    for (index, render) in renders.iter().enumerate() {
        match render.render(&text, event) {
            Ok(next) => text = next,
            Err(e) => on_error(index, e),
        }
    }
    text
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn upper() -> Arc<dyn Render> {
        Arc::new(|t: &str, _: Option<&MessageEvent>| -> anyhow::Result<String> {
            Ok(t.to_uppercase())
        })
    }

    fn failing() -> Arc<dyn Render> {
        Arc::new(|_: &str, _: Option<&MessageEvent>| -> anyhow::Result<String> {
            anyhow::bail!("template error")
        })
    }

    fn suffix() -> Arc<dyn Render> {
        Arc::new(|t: &str, _: Option<&MessageEvent>| -> anyhow::Result<String> {
            Ok(format!("{t}!"))
        })
    }

    #[test]
    fn renders_apply_in_order() {
        let out = apply(&[upper(), suffix()], "hi", None, |_, _| {});
        assert_eq!(out, "HI!");
    }

    #[test]
    fn failing_render_keeps_previous_text() {
        let mut failures = Vec::new();
        let out = apply(&[upper(), failing(), suffix()], "hi", None, |i, e| {
            failures.push((i, e.to_string()));
        });
        assert_eq!(out, "HI!");
        assert_eq!(failures, vec![(1, "template error".to_string())]);
    }

    #[test]
    fn event_is_visible_to_renders() {
        let event = MessageEvent::private("u1", "hello");
        let who: Arc<dyn Render> = Arc::new(|t: &str, e: Option<&MessageEvent>| -> anyhow::Result<String> {
            Ok(t.replace("{user}", e.map_or("?", |e| e.sender.user_id.as_str())))
        });
        assert_eq!(apply(&[who], "hi {user}", Some(&event), |_, _| {}), "hi u1");
    }
}
