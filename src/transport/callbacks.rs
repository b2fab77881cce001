//! Receive-callback table keyed by a one-byte tag

use std::{
    any::Any,
    fmt,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use log::{debug, warn};

use crate::{config::TAG_COUNT, fragment::Fragment};

/// Control tag carried by inbound messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(pub u8);

impl Tag {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u8> for Tag {
    fn from(value: u8) -> Self {
        Tag(value)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tag {}", self.0)
    }
}

/// Caller context handed back on every delivery
pub type CallbackData = Arc<dyn Any + Send + Sync>;

/// Handler invoked with the inbound descriptor, its tag and the context
/// registered alongside it
pub type RecvCallback = Arc<dyn Fn(&Fragment, Tag, &CallbackData) + Send + Sync>;

/// A stored `(callback, context)` pair
#[derive(Clone)]
pub struct RecvRegistration {
    pub callback: RecvCallback,
    pub data: CallbackData,
}

impl RecvRegistration {
    pub fn new(callback: RecvCallback, data: CallbackData) -> Self {
        Self { callback, data }
    }
}

impl fmt::Debug for RecvRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecvRegistration").finish_non_exhaustive()
    }
}

/// Dense table from tag to registration. Registering a tag again replaces
/// the previous entry.
pub struct CallbackTable {
    entries: RwLock<Vec<Option<RecvRegistration>>>,
}

impl CallbackTable {
    /// Create an empty table with one slot per tag value
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(vec![None; TAG_COUNT]),
        }
    }

    /// Store a callback for `tag`, returning the entry it replaced
    pub fn register(
        &self,
        tag: Tag,
        callback: RecvCallback,
        data: CallbackData,
    ) -> Option<RecvRegistration> {
        let previous = self.write()[tag.index()].replace(RecvRegistration::new(callback, data));
        if previous.is_some() {
            warn!("receive callback for {} replaced", tag);
        } else {
            debug!("receive callback registered for {}", tag);
        }
        previous
    }

    /// Remove the callback for `tag`
    pub fn unregister(&self, tag: Tag) -> Option<RecvRegistration> {
        self.write()[tag.index()].take()
    }

    /// Whether a callback is stored for `tag`
    pub fn is_registered(&self, tag: Tag) -> bool {
        self.read()[tag.index()].is_some()
    }

    /// Number of tags with a callback
    pub fn registered_count(&self) -> usize {
        self.read().iter().filter(|entry| entry.is_some()).count()
    }

    /// Invoke the callback stored for `tag`. Returns `false` when none is
    /// registered.
    ///
    /// The handler runs without the table lock held, so it may register or
    /// unregister tags itself.
    pub fn deliver(&self, fragment: &Fragment, tag: Tag) -> bool {
        let entry = self.read()[tag.index()].clone();
        match entry {
            Some(RecvRegistration { callback, data }) => {
                callback(fragment, tag, &data);
                true
            }
            None => {
                debug!("no receive callback for {}, message dropped", tag);
                false
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Option<RecvRegistration>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Option<RecvRegistration>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for CallbackTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CallbackTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackTable")
            .field("registered", &self.registered_count())
            .finish()
    }
}
