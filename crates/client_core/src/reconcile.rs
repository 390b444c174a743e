use chrono::{Local, NaiveDate};
use shared::protocol::MessagePayload;

/// The ordered, deduplicated message sequence of one conversation.
///
/// Ordering is append/replace order, matching the server's delivery order;
/// the sequence is never re-sorted by timestamp. Merges are keyed by
/// `message_id`, which makes them idempotent under re-delivery: the push
/// channel and a concurrent full fetch may race and deliver overlapping
/// information.
#[derive(Debug, Clone, Default)]
pub struct MessageThread {
    messages: Vec<MessagePayload>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Appended,
    Replaced,
}

impl MessageThread {
    /// Wholesale replacement with the server's authoritative list.
    pub fn replace_all(&mut self, messages: Vec<MessagePayload>) {
        self.messages = messages;
    }

    /// Id-keyed upsert: replace in place when the id exists (status
    /// transitions arrive as later events for the same id), append
    /// otherwise. Last write wins even if the status appears to regress;
    /// the server is authoritative.
    pub fn apply_inbound(&mut self, incoming: MessagePayload) -> MergeOutcome {
        if let Some(existing) = self
            .messages
            .iter_mut()
            .find(|message| message.message_id == incoming.message_id)
        {
            *existing = incoming;
            MergeOutcome::Replaced
        } else {
            self.messages.push(incoming);
            MergeOutcome::Appended
        }
    }

    pub fn messages(&self) -> &[MessagePayload] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// One renderable item of a message thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThreadItem<'a> {
    DateSeparator(NaiveDate),
    Message(&'a MessagePayload),
}

/// Lazily interleaves a date separator before the first message of each
/// local calendar day, in sequence order.
///
/// Pure: repeated calls over the same slice yield identical items.
pub fn group_by_date(messages: &[MessagePayload]) -> impl Iterator<Item = ThreadItem<'_>> {
    let mut current_day: Option<NaiveDate> = None;
    messages.iter().flat_map(move |message| {
        let day = message.timestamp.with_timezone(&Local).date_naive();
        let separator = if current_day != Some(day) {
            current_day = Some(day);
            Some(ThreadItem::DateSeparator(day))
        } else {
            None
        };
        separator
            .into_iter()
            .chain(std::iter::once(ThreadItem::Message(message)))
    })
}

#[cfg(test)]
#[path = "tests/reconcile_tests.rs"]
mod tests;
