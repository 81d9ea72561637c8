//! Step-stamped ring of contact buffers.
//!
//! Every step starts a fresh buffer and arbiters bump-allocate their contact
//! spans from it. A buffer is recycled once it is older than the collision
//! persistence window, so spans held by live arbiters are never overwritten.
//! Sleeping arbiters copy their contacts out into [`ContactStorage::Owned`]
//! before their span can go stale.

use std::collections::VecDeque;

use tracing::trace;

use crate::arbiter::Contact;

/// Contacts per buffer.
pub const CONTACTS_PER_BUFFER: usize = 1024;

#[derive(Debug, Clone)]
struct ContactBuffer {
    stamp: u64,
    contacts: Vec<Contact>,
}

/// A contiguous run of contacts inside one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ContactSpan {
    buffer: usize,
    start: usize,
    len: usize,
    stamp: u64,
}

/// Where an arbiter's contacts live.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) enum ContactStorage {
    /// No contacts.
    #[default]
    Empty,
    /// A span in the shared ring, valid while its buffer keeps the same stamp.
    Ring(ContactSpan),
    /// A private copy held while the arbiter sleeps.
    Owned(Vec<Contact>),
}

impl ContactStorage {
    pub(crate) fn get<'a>(&'a self, ring: &'a ContactRing) -> &'a [Contact] {
        match self {
            Self::Empty => &[],
            Self::Ring(span) => ring.get(span),
            Self::Owned(contacts) => contacts,
        }
    }

    pub(crate) fn get_mut<'a>(&'a mut self, ring: &'a mut ContactRing) -> &'a mut [Contact] {
        match self {
            Self::Empty => &mut [],
            Self::Ring(span) => ring.get_mut(span),
            Self::Owned(contacts) => contacts,
        }
    }

    pub(crate) fn len(&self, ring: &ContactRing) -> usize {
        self.get(ring).len()
    }

    /// Copy ring contacts into private storage.
    pub(crate) fn detach(&mut self, ring: &ContactRing) {
        if let Self::Ring(span) = self {
            *self = Self::Owned(ring.get(span).to_vec());
        }
    }

    /// Move private contacts back into the ring.
    pub(crate) fn attach(&mut self, ring: &mut ContactRing) {
        if let Self::Owned(contacts) = self {
            *self = if contacts.is_empty() {
                Self::Empty
            } else {
                Self::Ring(ring.alloc(contacts))
            };
        }
    }
}

/// Ring of contact buffers shared by all arbiters of a world.
#[derive(Debug, Clone, Default)]
pub(crate) struct ContactRing {
    buffers: Vec<ContactBuffer>,
    /// Buffer indices, oldest first. The back is the buffer being filled.
    order: VecDeque<usize>,
}

impl ContactRing {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Start a new buffer for `stamp`, recycling the oldest one if it has
    /// aged past `persistence` steps.
    pub(crate) fn push_fresh(&mut self, stamp: u64, persistence: u64) {
        let index = match self.order.front() {
            Some(&i) if stamp.saturating_sub(self.buffers[i].stamp) > persistence => {
                self.order.pop_front();
                trace!(buffer = i, stamp, "recycling contact buffer");
                let buffer = &mut self.buffers[i];
                buffer.stamp = stamp;
                buffer.contacts.clear();
                i
            }
            _ => {
                self.buffers.push(ContactBuffer {
                    stamp,
                    contacts: Vec::with_capacity(CONTACTS_PER_BUFFER),
                });
                self.buffers.len() - 1
            }
        };
        self.order.push_back(index);
    }

    fn head_stamp(&self) -> u64 {
        self.order.back().map_or(0, |&i| self.buffers[i].stamp)
    }

    /// Copy contacts into the head buffer.
    pub(crate) fn alloc(&mut self, contacts: &[Contact]) -> ContactSpan {
        let needs_fresh = self.order.back().map_or(true, |&i| {
            self.buffers[i].contacts.len() + contacts.len() > CONTACTS_PER_BUFFER
        });
        if needs_fresh {
            // Mid-step overflow: the new buffer shares the current stamp.
            let stamp = self.head_stamp();
            self.buffers.push(ContactBuffer {
                stamp,
                contacts: Vec::with_capacity(CONTACTS_PER_BUFFER),
            });
            self.order.push_back(self.buffers.len() - 1);
        }

        let index = self.order.back().copied().unwrap_or_default();
        let buffer = &mut self.buffers[index];
        let start = buffer.contacts.len();
        buffer.contacts.extend_from_slice(contacts);
        ContactSpan {
            buffer: index,
            start,
            len: contacts.len(),
            stamp: buffer.stamp,
        }
    }

    /// Give back the most recently allocated span.
    pub(crate) fn release_last(&mut self, span: &ContactSpan) {
        if let Some(buffer) = self.buffers.get_mut(span.buffer) {
            if buffer.stamp == span.stamp && buffer.contacts.len() == span.start + span.len {
                buffer.contacts.truncate(span.start);
            }
        }
    }

    fn get(&self, span: &ContactSpan) -> &[Contact] {
        match self.buffers.get(span.buffer) {
            Some(buffer) if buffer.stamp == span.stamp => buffer
                .contacts
                .get(span.start..span.start + span.len)
                .unwrap_or(&[]),
            _ => &[],
        }
    }

    fn get_mut(&mut self, span: &ContactSpan) -> &mut [Contact] {
        match self.buffers.get_mut(span.buffer) {
            Some(buffer) if buffer.stamp == span.stamp => buffer
                .contacts
                .get_mut(span.start..span.start + span.len)
                .unwrap_or(&mut []),
            _ => &mut [],
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn contacts(n: usize) -> Vec<Contact> {
        (0..n)
            .map(|i| Contact {
                hash: i as u64,
                ..Contact::default()
            })
            .collect()
    }

    #[test]
    fn test_buffers_recycled_after_persistence() {
        let mut ring = ContactRing::new();
        for stamp in 1..=4 {
            ring.push_fresh(stamp, 3);
        }
        assert_eq!(ring.buffers.len(), 4);

        // Stamp 1 is more than 3 steps old at stamp 5.
        ring.push_fresh(5, 3);
        assert_eq!(ring.buffers.len(), 4);
    }

    #[test]
    fn test_stale_span_reads_empty() {
        let mut ring = ContactRing::new();
        ring.push_fresh(1, 0);
        let span = ring.alloc(&contacts(2));
        assert_eq!(ring.get(&span).len(), 2);

        ring.push_fresh(2, 0);
        assert!(ring.get(&span).is_empty());
    }

    #[test]
    fn test_overflow_starts_new_buffer() {
        let mut ring = ContactRing::new();
        ring.push_fresh(1, 3);
        let first = ring.alloc(&contacts(CONTACTS_PER_BUFFER - 1));
        let second = ring.alloc(&contacts(2));

        assert_eq!(ring.buffers.len(), 2);
        assert_eq!(ring.get(&first).len(), CONTACTS_PER_BUFFER - 1);
        assert_eq!(ring.get(&second)[1].hash, 1);
    }

    #[test]
    fn test_release_last_span() {
        let mut ring = ContactRing::new();
        ring.push_fresh(1, 3);
        let kept = ring.alloc(&contacts(1));
        let dropped = ring.alloc(&contacts(2));
        ring.release_last(&dropped);

        let next = ring.alloc(&contacts(1));
        assert_eq!(next.start, kept.start + 1);
    }

    #[test]
    fn test_detach_survives_recycling() {
        let mut ring = ContactRing::new();
        ring.push_fresh(1, 0);
        let mut storage = ContactStorage::Ring(ring.alloc(&contacts(2)));
        storage.detach(&ring);

        ring.push_fresh(2, 0);
        assert_eq!(storage.len(&ring), 2);

        storage.attach(&mut ring);
        assert!(matches!(storage, ContactStorage::Ring(_)));
        assert_eq!(storage.get(&ring)[1].hash, 1);
    }
}
