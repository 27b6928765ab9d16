//! Listener registry with lock-free, copy-on-write snapshots.

use crate::listener::ListenerType;
use crate::priority::ListenerPriority;
use arc_swap::ArcSwap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// One listener bound to its owning plugin and declared priority.
pub struct ListenerRegistration<L: ?Sized> {
    listener: Arc<L>,
    owner_plugin_id: Arc<str>,
    priority: ListenerPriority,
    sequence: u64,
    listener_type: &'static str,
}

impl<L: ?Sized> ListenerRegistration<L> {
    pub fn listener(&self) -> &Arc<L> {
        &self.listener
    }

    pub fn owner_plugin_id(&self) -> &str {
        &self.owner_plugin_id
    }

    pub fn priority(&self) -> ListenerPriority {
        self.priority
    }

    /// Insertion order; breaks ties between equal priorities.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn listener_type(&self) -> &'static str {
        self.listener_type
    }

    pub fn is_listener(&self, listener: &Arc<L>) -> bool {
        same_listener(&self.listener, listener)
    }
}

impl<L: ?Sized> fmt::Debug for ListenerRegistration<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("owner_plugin_id", &self.owner_plugin_id)
            .field("listener_type", &self.listener_type)
            .field("priority", &self.priority)
            .field("sequence", &self.sequence)
            .finish()
    }
}

// Identity is the address of the listener value, ignoring vtable metadata.
fn same_listener<L: ?Sized>(a: &Arc<L>, b: &Arc<L>) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

fn dispatch_order<L: ?Sized>(
    a: &ListenerRegistration<L>,
    b: &ListenerRegistration<L>,
) -> std::cmp::Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.sequence.cmp(&b.sequence))
}

/// Point-in-time, already ordered view of a registry.
///
/// Holding a snapshot never blocks registry mutation and is never affected
/// by it.
pub struct Snapshot<L: ?Sized> {
    entries: Arc<Vec<Arc<ListenerRegistration<L>>>>,
}

impl<L: ?Sized> Snapshot<L> {
    pub fn iter(&self) -> std::slice::Iter<'_, Arc<ListenerRegistration<L>>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ListenerRegistration<L>> {
        self.entries.get(index).map(|r| &**r)
    }

    pub fn listeners(&self) -> impl Iterator<Item = &Arc<L>> + '_ {
        self.entries.iter().map(|r| &r.listener)
    }
}

impl<L: ?Sized> Clone for Snapshot<L> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<'a, L: ?Sized> IntoIterator for &'a Snapshot<L> {
    type Item = &'a Arc<ListenerRegistration<L>>;
    type IntoIter = std::slice::Iter<'a, Arc<ListenerRegistration<L>>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<L: ?Sized> fmt::Debug for Snapshot<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.iter()).finish()
    }
}

/// Authoritative, priority-ordered set of active listeners.
///
/// The ordered vector is published through [`ArcSwap`]; every mutation builds
/// a new sorted copy (read-copy-update) so readers only ever see complete
/// states.
pub struct ListenerRegistry<L: ?Sized> {
    entries: ArcSwap<Vec<Arc<ListenerRegistration<L>>>>,
    next_sequence: AtomicU64,
}

impl<L: ?Sized + ListenerType + Send + Sync> ListenerRegistry<L> {
    pub fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(Vec::new()),
            next_sequence: AtomicU64::new(0),
        }
    }

    /// Add `listener`, or update its owner and priority if already present.
    ///
    /// An updated listener keeps its original insertion position among
    /// listeners of the same priority. Returns `true` if this replaced an
    /// existing registration.
    pub fn register(
        &self,
        listener: Arc<L>,
        owner_plugin_id: impl Into<String>,
        priority: ListenerPriority,
    ) -> bool {
        let owner: Arc<str> = Arc::from(owner_plugin_id.into());
        let listener_type = ListenerType::listener_type(&*listener);
        let fresh_sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);

        let previous = self.entries.rcu(|current| {
            let sequence = current
                .iter()
                .find(|r| r.is_listener(&listener))
                .map_or(fresh_sequence, |r| r.sequence);
            let mut next: Vec<_> = current
                .iter()
                .filter(|r| !r.is_listener(&listener))
                .cloned()
                .collect();
            next.push(Arc::new(ListenerRegistration {
                listener: Arc::clone(&listener),
                owner_plugin_id: Arc::clone(&owner),
                priority,
                sequence,
                listener_type,
            }));
            next.sort_by(|a, b| dispatch_order(a, b));
            next
        });

        let replaced = previous.iter().any(|r| r.is_listener(&listener));
        debug!(
            plugin = %owner,
            listener = listener_type,
            priority = %priority,
            replaced,
            "listener registered"
        );
        replaced
    }

    /// Remove `listener`. Unknown listeners are ignored; returns whether
    /// anything was removed.
    pub fn unregister(&self, listener: &Arc<L>) -> bool {
        if !self.contains(listener) {
            return false;
        }
        let previous = self.entries.rcu(|current| {
            current
                .iter()
                .filter(|r| !r.is_listener(listener))
                .cloned()
                .collect::<Vec<_>>()
        });
        match previous.iter().find(|r| r.is_listener(listener)) {
            Some(removed) => {
                debug!(
                    plugin = %removed.owner_plugin_id,
                    listener = removed.listener_type,
                    "listener unregistered"
                );
                true
            }
            None => false,
        }
    }

    /// Remove every listener owned by `owner_plugin_id`; returns how many
    /// were removed.
    pub fn unregister_plugin(&self, owner_plugin_id: &str) -> usize {
        let owned = |r: &Arc<ListenerRegistration<L>>| &*r.owner_plugin_id == owner_plugin_id;
        if !self.entries.load().iter().any(owned) {
            return 0;
        }
        let previous = self.entries.rcu(|current| {
            current
                .iter()
                .filter(|r| !owned(*r))
                .cloned()
                .collect::<Vec<_>>()
        });
        let removed = previous.iter().filter(|r| owned(*r)).count();
        debug!(plugin = owner_plugin_id, removed, "plugin listeners unregistered");
        removed
    }

    /// Current ordered view: priority descending, then insertion order.
    pub fn snapshot(&self) -> Snapshot<L> {
        Snapshot {
            entries: self.entries.load_full(),
        }
    }

    pub fn contains(&self, listener: &Arc<L>) -> bool {
        self.entries.load().iter().any(|r| r.is_listener(listener))
    }

    pub fn priority_of(&self, listener: &Arc<L>) -> Option<ListenerPriority> {
        self.entries
            .load()
            .iter()
            .find(|r| r.is_listener(listener))
            .map(|r| r.priority)
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }

    /// Drop all registrations; returns how many there were.
    pub fn clear(&self) -> usize {
        self.entries.swap(Arc::new(Vec::new())).len()
    }
}

impl<L: ?Sized + ListenerType + Send + Sync> Default for ListenerRegistry<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ?Sized> fmt::Debug for ListenerRegistry<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("entries", &self.entries.load().len())
            .finish()
    }
}
