//! Plain-text rendering of session events

use std::collections::HashMap;
use std::io::Write;

use mate_agent::SessionEvent;
use mate_ai::Role;

/// Turns session events into terminal output
#[derive(Default)]
pub struct Renderer {
    roles: HashMap<u64, Role>,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text to print for `event`, if any
    pub fn render(&mut self, event: &SessionEvent) -> Option<String> {
        match event {
            SessionEvent::MessageAdded { id, role, content } => {
                self.roles.insert(*id, *role);
                (*role == Role::System && !content.is_empty()).then(|| format!("{}\n", content))
            }
            SessionEvent::MessageUpdated {
                content,
                append: true,
                ..
            } => Some(content.clone()),
            SessionEvent::MessageUpdated {
                id,
                content,
                append: false,
            } => match self.roles.get(id) {
                Some(Role::Assistant) => Some(format!("\n\n[post-processed]\n{}", content)),
                _ => Some(format!("{}\n", content)),
            },
            SessionEvent::TurnComplete {
                chunk_count: Some(chunks),
                duration_ms,
                ..
            } => Some(format!(
                "\n[{} chunks, {:.1}s]\n",
                chunks,
                *duration_ms as f64 / 1000.0
            )),
            SessionEvent::TurnComplete {
                chunk_count: None, ..
            } => Some("\n".to_string()),
            SessionEvent::ChatCleared => {
                self.roles.clear();
                None
            }
            SessionEvent::ContextInfoChanged { .. } | SessionEvent::PostProcessed { .. } => None,
        }
    }

    /// Render and print to stdout
    pub fn print(&mut self, event: &SessionEvent) {
        if let Some(text) = self.render(event) {
            let mut stdout = std::io::stdout();
            let _ = stdout.write_all(text.as_bytes());
            let _ = stdout.flush();
        }
    }
}
