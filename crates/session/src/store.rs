use crate::message::{Message, MessageId};

/// Ordered message container for one conversation.
///
/// Arrivals append; existing rows change only in place or by replacement at
/// the same position, so display order never reshuffles. All mutation is
/// funneled through the reconciliation engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageStore {
    messages: Vec<Message>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store with already-settled history rows.
    pub fn from_history(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| &message.id == id)
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.get(id).is_some()
    }

    /// Identity-preserving in-place update. Returns false when absent.
    pub fn update<F>(&mut self, id: &MessageId, mutate: F) -> bool
    where
        F: FnOnce(&mut Message),
    {
        match self.messages.iter_mut().find(|message| &message.id == id) {
            Some(message) => {
                mutate(message);
                true
            }
            None => false,
        }
    }

    /// Replaces the row wholesale at its current position.
    ///
    /// This is the one sanctioned id-swap path: the replacement may carry a
    /// different (durable) id than the row it displaces.
    pub fn replace(&mut self, id: &MessageId, replacement: Message) -> bool {
        match self.messages.iter_mut().find(|message| &message.id == id) {
            Some(slot) => {
                *slot = replacement;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &MessageId) -> Option<Message> {
        let index = self.messages.iter().position(|message| &message.id == id)?;
        Some(self.messages.remove(index))
    }

    /// Returns the unique streaming row, if any.
    pub fn streaming_message(&self) -> Option<&Message> {
        self.messages.iter().find(|message| message.streaming)
    }

    /// Clears every streaming flag, returning how many rows were cleared.
    pub fn clear_streaming_flags(&mut self) -> usize {
        let mut cleared = 0;
        for message in &mut self.messages {
            if message.streaming {
                message.streaming = false;
                cleared += 1;
            }
        }
        cleared
    }

    /// Finalizes every streaming row in place: no longer streaming, no
    /// longer temporary, content untouched.
    pub fn settle_streaming(&mut self) -> usize {
        let mut settled = 0;
        for message in &mut self.messages {
            if message.streaming {
                message.streaming = false;
                message.temporary = false;
                settled += 1;
            }
        }
        settled
    }

    /// Removes every streaming row, returning how many were removed.
    pub fn remove_streaming(&mut self) -> usize {
        let before = self.messages.len();
        self.messages.retain(|message| !message.streaming);
        before - self.messages.len()
    }
}
