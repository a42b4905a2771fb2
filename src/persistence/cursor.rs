//! Single-pass cursor over persisted records

use std::fmt;

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// Finite, non-restartable sequence of records with a release hook.
///
/// The hook runs exactly once when the cursor is dropped, whether it was
/// fully consumed, abandoned after an early `break`, or dropped while an
/// error propagates.
pub struct Cursor<T> {
    items: std::vec::IntoIter<T>,
    release: Option<ReleaseHook>,
}

impl<T> Cursor<T> {
    /// A cursor with nothing to release
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: items.into_iter(),
            release: None,
        }
    }

    pub fn with_release<F>(items: Vec<T>, release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            items: items.into_iter(),
            release: Some(Box::new(release)),
        }
    }

    /// Release the underlying resource now
    pub fn close(self) {
        drop(self);
    }
}

impl<T> Iterator for Cursor<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.items.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.items.size_hint()
    }
}

impl<T> Drop for Cursor<T> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl<T> fmt::Debug for Cursor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("remaining", &self.items.len())
            .field("open", &self.release.is_some())
            .finish()
    }
}
