// src/render.rs - Turning a print payload into drawing commands
//
// Markup parsing (bold/QR markers and the like) is owned by an external
// renderer plugged in through `CommandRenderer`.

use receipt_shared::{DrawCommand, ErrorCode, ErrorInfo, JobPhase};

pub trait CommandRenderer: Send + Sync {
    fn render(&self, payload: &str) -> Result<Vec<DrawCommand>, ErrorInfo>;
}

/// Prints the payload verbatim, then feeds and cuts.
#[derive(Debug, Clone)]
pub struct PlainTextRenderer {
    pub feed_lines: u8,
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self { feed_lines: 3 }
    }
}

impl CommandRenderer for PlainTextRenderer {
    fn render(&self, payload: &str) -> Result<Vec<DrawCommand>, ErrorInfo> {
        if payload.trim().is_empty() {
            return Err(ErrorInfo::new(ErrorCode::Param, JobPhase::Render).with_detail("empty print payload"));
        }
        let mut text = payload.to_string();
        if !text.ends_with('\n') {
            text.push('\n');
        }
        Ok(vec![
            DrawCommand::Text(text),
            DrawCommand::Feed(self.feed_lines),
            DrawCommand::Cut,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_ends_with_feed_and_cut() {
        let commands = PlainTextRenderer::default().render("Hello").unwrap();
        assert_eq!(
            commands,
            vec![
                DrawCommand::Text("Hello\n".to_string()),
                DrawCommand::Feed(3),
                DrawCommand::Cut,
            ]
        );
    }

    #[test]
    fn blank_payload_is_a_parameter_error() {
        let err = PlainTextRenderer::default().render("  \n").unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::Param);
        assert_eq!(err.context, JobPhase::Render);
    }
}
