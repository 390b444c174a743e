use shared::{domain::CorrespondentId, protocol::ConversationSummary};

/// The conversation list, keyed by correspondent id and ordered by
/// most-recent-activity.
///
/// The server pushes no deltas for the list itself; every refresh replaces
/// it wholesale, so no partial view is ever observable.
#[derive(Debug, Clone, Default)]
pub struct ConversationIndex {
    conversations: Vec<ConversationSummary>,
    selected: Option<CorrespondentId>,
}

impl ConversationIndex {
    /// Sorts descending by last-activity timestamp and replaces the held
    /// list atomically. The sort is stable, so repeated refreshes with
    /// unchanged input keep their order.
    pub fn replace_all(&mut self, mut conversations: Vec<ConversationSummary>) {
        conversations.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        self.conversations = conversations;
    }

    /// Marks a conversation active. Does not reorder the list.
    pub fn select(&mut self, correspondent_id: CorrespondentId) {
        self.selected = Some(correspondent_id);
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    pub fn selected(&self) -> Option<&CorrespondentId> {
        self.selected.as_ref()
    }

    pub fn conversations(&self) -> &[ConversationSummary] {
        &self.conversations
    }

    pub fn get(&self, correspondent_id: &CorrespondentId) -> Option<&ConversationSummary> {
        self.conversations
            .iter()
            .find(|conversation| &conversation.wa_id == correspondent_id)
    }
}

#[cfg(test)]
#[path = "tests/index_tests.rs"]
mod tests;
