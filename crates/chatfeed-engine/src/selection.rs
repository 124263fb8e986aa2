//! Which message a contextual action applies to.

use chatfeed_store::MessageId;

use crate::EngineError;
use crate::feed::Message;

/// Opaque handle to the place the selection was made from (a row, a menu
/// position). The engine stores it and hands it back; it never inspects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Anchor(pub u64);

/// The selected message, as it was when selected, and where it was selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub anchor: Anchor,
    pub message: Message,
}

impl Selection {
    /// Id of the selected message.
    pub fn target(&self) -> &MessageId {
        &self.message.id
    }
}

/// `Empty -> Selected -> Empty`. Selecting while selected replaces the pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SelectionState {
    #[default]
    Empty,
    Selected(Selection),
}

impl SelectionState {
    pub fn select(&mut self, anchor: Anchor, message: Message) {
        *self = SelectionState::Selected(Selection { anchor, message });
    }

    /// Return to `Empty`, handing back what was selected.
    pub fn clear(&mut self) -> Option<Selection> {
        match std::mem::take(self) {
            SelectionState::Empty => None,
            SelectionState::Selected(selection) => Some(selection),
        }
    }

    pub fn current(&self) -> Option<&Selection> {
        match self {
            SelectionState::Empty => None,
            SelectionState::Selected(selection) => Some(selection),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, SelectionState::Empty)
    }

    /// Check that a contextual action on `target` is allowed.
    pub fn require(&self, target: &MessageId) -> Result<&Selection, EngineError> {
        let selection = self.current().ok_or(EngineError::NoSelection)?;
        if selection.target() != target {
            return Err(EngineError::SelectionMismatch {
                selected: selection.target().clone(),
                requested: target.clone(),
            });
        }
        Ok(selection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatfeed_store::UserId;
    use chrono::{TimeZone, Utc};

    fn message(id: &str) -> Message {
        Message {
            id: MessageId::from(id),
            text: format!("text {}", id),
            sent_by: UserId::from("u1"),
            sent_at: Utc.timestamp_opt(1, 0).unwrap(),
            sender: None,
        }
    }

    #[test]
    fn test_select_then_clear() {
        let mut state = SelectionState::default();
        assert!(state.is_empty());

        state.select(Anchor(7), message("m1"));
        let current = state.current().unwrap();
        assert_eq!(current.anchor, Anchor(7));
        assert_eq!(current.target(), &MessageId::from("m1"));
        assert_eq!(current.message.text, "text m1");

        let cleared = state.clear().unwrap();
        assert_eq!(cleared.message, message("m1"));
        assert!(state.is_empty());
        assert!(state.clear().is_none());
    }

    #[test]
    fn test_select_replaces_previous_pair() {
        let mut state = SelectionState::default();
        state.select(Anchor(1), message("m1"));
        state.select(Anchor(2), message("m2"));

        assert_eq!(
            state.current(),
            Some(&Selection {
                anchor: Anchor(2),
                message: message("m2"),
            })
        );
    }

    #[test]
    fn test_require() {
        let mut state = SelectionState::default();
        assert!(matches!(
            state.require(&MessageId::from("m1")),
            Err(EngineError::NoSelection)
        ));

        state.select(Anchor(1), message("m1"));
        assert!(state.require(&MessageId::from("m1")).is_ok());
        assert!(matches!(
            state.require(&MessageId::from("m2")),
            Err(EngineError::SelectionMismatch { .. })
        ));
    }
}
