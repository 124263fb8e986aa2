//! Terminal rendering of feed changes.

use std::collections::HashMap;

use chatfeed_engine::Message;
use chatfeed_store::MessageId;

/// Format one message as a single line.
pub fn format_message(message: &Message) -> String {
    let sender = match &message.sender {
        Some(profile) => profile.display_name(),
        None => format!("unknown ({})", message.sent_by),
    };
    format!(
        "[{}] {} <{}>: {}",
        message.sent_at.format("%Y-%m-%d %H:%M:%S"),
        sender,
        message.id,
        message.text
    )
}

/// Turns successive snapshots into the lines that describe what changed.
#[derive(Debug, Default)]
pub struct FeedPrinter {
    seen: HashMap<MessageId, String>,
}

impl FeedPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines for everything new, edited or gone since the last snapshot.
    pub fn diff(&mut self, snapshot: &[Message]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut current = HashMap::with_capacity(snapshot.len());

        for message in snapshot {
            match self.seen.get(&message.id) {
                None => lines.push(format_message(message)),
                Some(text) if text != &message.text => {
                    lines.push(format!("{} (edited)", format_message(message)));
                }
                Some(_) => {}
            }
            current.insert(message.id.clone(), message.text.clone());
        }

        let mut removed: Vec<&MessageId> = self
            .seen
            .keys()
            .filter(|id| !current.contains_key(*id))
            .collect();
        removed.sort();
        lines.extend(removed.into_iter().map(|id| format!("<{}> deleted", id)));

        self.seen = current;
        lines
    }
}
