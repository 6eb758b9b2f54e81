//! Change notifications raised by a [`DocumentBuffer`](super::buffer::DocumentBuffer).
//!
//! Every buffer owns its own listener list; there is no global event bus. Listeners are
//! invoked synchronously on the editing thread right after the edit is applied.

use std::ops::Range;

/// Describes one successful edit in character and line terms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferChange {
    /// Character offset where the edit happened
    pub offset: usize,
    /// Line containing `offset` (before and after the edit, they agree)
    pub start_line: usize,
    pub removed_chars: usize,
    pub inserted_chars: usize,
    /// Newlines removed by the edit
    pub removed_lines: usize,
    /// Newlines introduced by the edit
    pub inserted_lines: usize,
    /// Buffer version after the edit
    pub version: u64,
}

impl BufferChange {
    /// Character range the edit replaced, in pre-edit coordinates
    pub fn old_range(&self) -> Range<usize> {
        self.offset..self.offset + self.removed_chars
    }

    /// Character range of the new text, in post-edit coordinates
    pub fn new_range(&self) -> Range<usize> {
        self.offset..self.offset + self.inserted_chars
    }

    /// Net change in line count
    pub fn line_delta(&self) -> isize {
        self.inserted_lines as isize - self.removed_lines as isize
    }

    /// Lines touched by the new text, in post-edit coordinates
    pub fn affected_lines(&self) -> Range<usize> {
        self.start_line..self.start_line + self.inserted_lines + 1
    }
}

/// Receives change notifications from a buffer
pub trait ChangeListener: Send {
    fn on_change(&mut self, change: &BufferChange);
}

impl<F> ChangeListener for F
where
    F: FnMut(&BufferChange) + Send,
{
    fn on_change(&mut self, change: &BufferChange) {
        self(change)
    }
}

/// Handle returned by [`ChangeListeners::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// The per-buffer notification channel
#[derive(Default)]
pub struct ChangeListeners {
    next_id: u64,
    listeners: Vec<(ListenerId, Box<dyn ChangeListener>)>,
}

impl ChangeListeners {
    pub fn subscribe(&mut self, listener: Box<dyn ChangeListener>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, listener));
        id
    }

    /// Remove a listener; returns false if it was not registered
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    pub fn notify(&mut self, change: &BufferChange) {
        for (_, listener) in self.listeners.iter_mut() {
            listener.on_change(change);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl std::fmt::Debug for ChangeListeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeListeners")
            .field("count", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn change() -> BufferChange {
        BufferChange {
            offset: 4,
            start_line: 1,
            removed_chars: 2,
            inserted_chars: 5,
            removed_lines: 0,
            inserted_lines: 2,
            version: 7,
        }
    }

    #[test]
    fn test_ranges_and_delta() {
        let c = change();
        assert_eq!(c.old_range(), 4..6);
        assert_eq!(c.new_range(), 4..9);
        assert_eq!(c.line_delta(), 2);
        assert_eq!(c.affected_lines(), 1..4);
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut listeners = ChangeListeners::default();
        let sink = seen.clone();
        let id = listeners.subscribe(Box::new(move |c: &BufferChange| {
            sink.lock().unwrap().push(c.version);
        }));

        listeners.notify(&change());
        assert!(listeners.unsubscribe(id));
        assert!(!listeners.unsubscribe(id));
        listeners.notify(&change());

        assert_eq!(*seen.lock().unwrap(), vec![7]);
        assert!(listeners.is_empty());
    }
}
