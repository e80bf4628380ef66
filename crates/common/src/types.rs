//! Message value types shared by adapters, the kernel and plugins.

use serde::{Deserialize, Serialize};

/// One piece of an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Segment {
    Text { text: String },
    Image { url: String },
    Mention { user_id: String },
    /// Quote an earlier message by id.
    Reply { message_id: String },
}

/// What a middleware or command hands back to be delivered on the
/// originating conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub segments: Vec<Segment>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            segments: vec![Segment::Text { text: text.into() }],
        }
    }

    pub fn with_segment(mut self, segment: Segment) -> Self {
        self.segments.push(segment);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(|s| match s {
            Segment::Text { text } => text.is_empty(),
            _ => false,
        })
    }

    /// Concatenated text content, ignoring non-text segments.
    pub fn plain_text(&self) -> String {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Rewrite every text segment in place.
    pub fn map_text<E>(
        &mut self,
        mut f: impl FnMut(&str) -> Result<String, E>,
    ) -> Result<(), E> {
        for segment in &mut self.segments {
            if let Segment::Text { text } = segment {
                *text = f(text)?;
            }
        }
        Ok(())
    }
}

impl From<String> for Reply {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}

impl From<&str> for Reply {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_reply_is_empty() {
        assert!(Reply::text("").is_empty());
        assert!(Reply::default().is_empty());
        assert!(!Reply::text("hi").is_empty());
        let image = Reply::default().with_segment(Segment::Image {
            url: "https://example.com/a.png".into(),
        });
        assert!(!image.is_empty());
    }

    #[test]
    fn plain_text_skips_media() {
        let reply = Reply::text("hello ")
            .with_segment(Segment::Mention {
                user_id: "42".into(),
            })
            .with_segment(Segment::Text {
                text: "world".into(),
            });
        assert_eq!(reply.plain_text(), "hello world");
    }

    #[test]
    fn segment_serializes_with_type_tag() {
        let json = serde_json::to_value(Segment::Text { text: "x".into() }).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["text"], "x");
    }
}
