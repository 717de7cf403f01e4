//! The subsystem message queue: a [`crate::queue::BoundedQueue`] of
//! `{msg, options}` pairs, shared between the `processor` (which enqueues
//! via `accept`) and the `scheduler` (which drains it). See `spec.md` §4.6.

use crate::message::{Message, MessageId};
use crate::security::SendOptions;

/// One queued `{msg, options}` pair. Equality is by message id — the
/// scheduler relies on this to remove the *exact* pair it selected from a
/// snapshot without requiring the message body to be comparable.
#[derive(Debug, Clone)]
pub struct QueuedMessage<B> {
    pub msg: Message<B>,
    pub options: SendOptions,
}

impl<B> QueuedMessage<B> {
    pub fn new(msg: Message<B>, options: SendOptions) -> Self {
        Self { msg, options }
    }

    pub fn id(&self) -> &MessageId {
        self.msg.id()
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.msg.meta().timestamp_ms()
    }
}

impl<B> PartialEq for QueuedMessage<B> {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl<B> Eq for QueuedMessage<B> {}
