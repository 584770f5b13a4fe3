//! Human-readable transcript rendering.

use tandem_core::message::{Message, MessageBlock};

/// Render one message as transcript lines.
pub fn transcript_line(message: &Message) -> String {
    match message {
        Message::System { content } => format!("System: {content}"),
        Message::User { content } => format!("User: {content}"),
        Message::Assistant(reply) => {
            let mut lines = Vec::new();
            for block in &reply.content {
                match block {
                    MessageBlock::Text { text } if !text.is_empty() => {
                        lines.push(format!("Assistant: {text}"));
                    }
                    MessageBlock::ToolCall(call) => {
                        lines.push(format!(
                            "Tool call: {}({}) [{}]",
                            call.name, call.arguments, call.id
                        ));
                    }
                    MessageBlock::ServerToolCall(call) => {
                        lines.push(format!("Server tool call: {}({})", call.name, call.arguments));
                    }
                    _ => {}
                }
            }
            if lines.is_empty() {
                lines.push("Assistant:".to_string());
            }
            lines.join("\n")
        }
        Message::ToolResult { .. } => format!("Call result: {}", message.model_text()),
        Message::ToolError { error, .. } => format!("Call error: {error}"),
    }
}

/// Render a whole history, one message per paragraph.
pub fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(transcript_line)
        .collect::<Vec<_>>()
        .join("\n\n")
}
