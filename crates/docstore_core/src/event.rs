//! Structural change events and the per-store event queue.
//!
//! Node operations append events to the queue of the shared store. The
//! queue is flushed by the session whenever an event-producing operation
//! completes outside a transaction, and at commit. Rollback discards it.
//!
//! Before delivery, adjacent events that share kind, parent and language
//! are merged (see [`compress_events`]).

use std::cell::Cell;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};

use crate::types::{ListenerResult, NodeId};

/// Kind of structural change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Nodes were inserted into a group.
    NodesAdded,
    /// Nodes were removed from a group.
    NodesRemoved,
    /// Node fields changed.
    NodesChanged,
    /// The tree changed in a way listeners should reload from scratch.
    NodesStructureChanged,
}

/// A structural change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocEvent {
    /// Kind of change.
    pub kind: EventKind,
    /// Group containing the affected nodes, if known.
    pub parent: Option<NodeId>,
    /// Affected nodes.
    pub nodes: Vec<NodeId>,
    /// Language of a field change; `None` for the original language.
    pub lang: Option<String>,
}

impl DocEvent {
    /// Nodes added to `parent`.
    pub fn added(parent: &NodeId, nodes: Vec<NodeId>) -> Self {
        Self {
            kind: EventKind::NodesAdded,
            parent: Some(parent.clone()),
            nodes,
            lang: None,
        }
    }

    /// Nodes removed from `parent`.
    pub fn removed(parent: &NodeId, nodes: Vec<NodeId>) -> Self {
        Self {
            kind: EventKind::NodesRemoved,
            parent: Some(parent.clone()),
            nodes,
            lang: None,
        }
    }

    /// Node fields changed in `lang`.
    pub fn changed(parent: Option<NodeId>, nodes: Vec<NodeId>, lang: Option<String>) -> Self {
        Self {
            kind: EventKind::NodesChanged,
            parent,
            nodes,
            lang,
        }
    }

    /// Whole-tree reload sentinel.
    pub fn structure_changed() -> Self {
        Self {
            kind: EventKind::NodesStructureChanged,
            parent: None,
            nodes: Vec::new(),
            lang: None,
        }
    }

    fn mergeable_with(&self, other: &DocEvent) -> bool {
        self.kind == other.kind
            && self.parent.is_some()
            && self.parent == other.parent
            && self.lang == other.lang
    }
}

/// Receives structural change events.
pub trait DocListener: Send + Sync {
    /// Called once per (compressed) event.
    fn on_event(&self, event: &DocEvent) -> ListenerResult;
}

/// Merges adjacent compatible events in place.
///
/// Walking from the back, an event absorbs its predecessor if both have the
/// same kind, the same non-empty parent and the same language; the merged
/// event keeps the later position and the union of node ids. If more than
/// one `NodesChanged` event survives, the whole queue is replaced by a single
/// `NodesStructureChanged` event.
pub fn compress_events(queue: &mut Vec<DocEvent>) {
    let mut i = queue.len().saturating_sub(1);
    while i > 0 {
        if queue[i].mergeable_with(&queue[i - 1]) {
            let earlier = queue.remove(i - 1);
            let later = &mut queue[i - 1];
            let mut nodes = earlier.nodes;
            for id in later.nodes.drain(..) {
                if !nodes.contains(&id) {
                    nodes.push(id);
                }
            }
            later.nodes = nodes;
        }
        i -= 1;
    }

    let changed = queue
        .iter()
        .filter(|e| e.kind == EventKind::NodesChanged)
        .count();
    if changed > 1 {
        queue.clear();
        queue.push(DocEvent::structure_changed());
    }
}

/// Per-store event queue with listener registry.
pub struct EventQueue {
    queue: Mutex<Vec<DocEvent>>,
    listeners: Mutex<Vec<Arc<dyn DocListener>>>,
    /// Held for a whole dispatch; the flag marks a running dispatch on the
    /// owning thread.
    dispatching: ReentrantMutex<Cell<bool>>,
}

impl EventQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            dispatching: ReentrantMutex::new(Cell::new(false)),
        }
    }

    /// Appends an event. Events are dropped while no listener is registered.
    pub fn push(&self, event: DocEvent) {
        if self.listeners.lock().is_empty() {
            return;
        }
        self.queue.lock().push(event);
    }

    /// Compresses and delivers all queued events.
    ///
    /// Callers on other threads wait for a running dispatch to finish and
    /// then deliver what is left. Reentrant calls made by a listener on the
    /// dispatching thread return immediately; their events are delivered by
    /// the next dispatch.
    pub fn dispatch(&self) {
        let dispatching = self.dispatching.lock();
        if dispatching.replace(true) {
            return;
        }
        let mut events = std::mem::take(&mut *self.queue.lock());
        compress_events(&mut events);
        let listeners = self.listeners.lock().clone();
        for event in &events {
            for listener in &listeners {
                if let Err(e) = listener.on_event(event) {
                    tracing::warn!(kind = ?event.kind, error = %e, "doc listener failed");
                }
            }
        }
        dispatching.set(false);
    }

    /// Drops all queued events without delivering them.
    pub fn discard(&self) {
        self.queue.lock().clear();
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Returns true if no events are queued.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Registers a listener. Registering the same listener twice is a no-op.
    pub fn add_listener(&self, listener: Arc<dyn DocListener>) {
        let mut listeners = self.listeners.lock();
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    /// Unregisters a listener. Returns true if it was registered.
    pub fn remove_listener(&self, listener: &Arc<dyn DocListener>) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn id(s: &str) -> NodeId {
        NodeId::new(s)
    }

    #[derive(Default)]
    struct Collector {
        events: Mutex<Vec<DocEvent>>,
    }

    impl DocListener for Collector {
        fn on_event(&self, event: &DocEvent) -> ListenerResult {
            self.events.lock().push(event.clone());
            Ok(())
        }
    }

    #[test]
    fn adjacent_events_merge() {
        let mut queue = vec![
            DocEvent::added(&id("g"), vec![id("a")]),
            DocEvent::added(&id("g"), vec![id("b")]),
            DocEvent::added(&id("g"), vec![id("a"), id("c")]),
        ];
        compress_events(&mut queue);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].nodes, vec![id("a"), id("b"), id("c")]);
    }

    #[test]
    fn different_parent_kind_or_lang_do_not_merge() {
        let mut queue = vec![
            DocEvent::added(&id("g1"), vec![id("a")]),
            DocEvent::added(&id("g2"), vec![id("b")]),
            DocEvent::removed(&id("g2"), vec![id("c")]),
        ];
        compress_events(&mut queue);
        assert_eq!(queue.len(), 3);

        let mut queue = vec![
            DocEvent::changed(Some(id("g")), vec![id("a")], Some("de".into())),
            DocEvent::changed(Some(id("g")), vec![id("b")], None),
        ];
        compress_events(&mut queue);
        // two NodesChanged survive, so the sentinel replaces them
        assert_eq!(queue, vec![DocEvent::structure_changed()]);
    }

    #[test]
    fn events_without_parent_never_merge() {
        let mut queue = vec![
            DocEvent::changed(None, vec![id("a")], None),
            DocEvent::changed(None, vec![id("b")], None),
        ];
        compress_events(&mut queue);
        assert_eq!(queue, vec![DocEvent::structure_changed()]);
    }

    #[test]
    fn single_changed_event_is_kept() {
        let mut queue = vec![
            DocEvent::changed(Some(id("g")), vec![id("a")], None),
            DocEvent::changed(Some(id("g")), vec![id("b")], None),
            DocEvent::added(&id("g"), vec![id("c")]),
        ];
        compress_events(&mut queue);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].kind, EventKind::NodesChanged);
        assert_eq!(queue[0].nodes, vec![id("a"), id("b")]);
    }

    #[test]
    fn push_without_listeners_is_dropped() {
        let queue = EventQueue::new();
        queue.push(DocEvent::added(&id("g"), vec![id("a")]));
        assert!(queue.is_empty());
    }

    #[test]
    fn dispatch_compresses_and_clears() {
        let queue = EventQueue::new();
        let collector = Arc::new(Collector::default());
        queue.add_listener(collector.clone());
        queue.push(DocEvent::added(&id("g"), vec![id("a")]));
        queue.push(DocEvent::added(&id("g"), vec![id("b")]));
        assert_eq!(queue.len(), 2);
        queue.dispatch();
        assert!(queue.is_empty());
        let events = collector.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].nodes, vec![id("a"), id("b")]);
    }

    struct BlockingListener {
        seen: Mutex<Vec<DocEvent>>,
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl DocListener for BlockingListener {
        fn on_event(&self, event: &DocEvent) -> ListenerResult {
            let first = {
                let mut seen = self.seen.lock();
                seen.push(event.clone());
                seen.len() == 1
            };
            if first {
                self.entered.lock().send(()).unwrap();
                self.release.lock().recv().unwrap();
            }
            Ok(())
        }
    }

    #[test]
    fn concurrent_dispatch_waits_and_delivers() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let listener = Arc::new(BlockingListener {
            seen: Mutex::new(Vec::new()),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        let queue = Arc::new(EventQueue::new());
        queue.add_listener(listener.clone());
        queue.push(DocEvent::added(&id("g1"), vec![id("a")]));

        let first = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dispatch())
        };
        entered_rx.recv().unwrap();

        let second = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                queue.push(DocEvent::removed(&id("g2"), vec![id("b")]));
                queue.dispatch();
            })
        };
        thread::sleep(Duration::from_millis(50));
        release_tx.send(()).unwrap();
        first.join().unwrap();
        second.join().unwrap();

        assert!(queue.is_empty());
        let seen = listener.seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1], DocEvent::removed(&id("g2"), vec![id("b")]));
    }

    struct Redispatcher {
        queue: Arc<EventQueue>,
        calls: Mutex<usize>,
    }

    impl DocListener for Redispatcher {
        fn on_event(&self, _event: &DocEvent) -> ListenerResult {
            *self.calls.lock() += 1;
            self.queue.push(DocEvent::removed(&id("g"), vec![id("x")]));
            self.queue.dispatch();
            Ok(())
        }
    }

    #[test]
    fn reentrant_dispatch_defers_to_next_flush() {
        let queue = Arc::new(EventQueue::new());
        let listener = Arc::new(Redispatcher {
            queue: Arc::clone(&queue),
            calls: Mutex::new(0),
        });
        queue.add_listener(listener.clone());
        queue.push(DocEvent::added(&id("g"), vec![id("a")]));
        queue.dispatch();
        assert_eq!(*listener.calls.lock(), 1);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn discard_drops_events() {
        let queue = EventQueue::new();
        let collector = Arc::new(Collector::default());
        queue.add_listener(collector.clone());
        queue.push(DocEvent::removed(&id("g"), vec![id("a")]));
        queue.discard();
        queue.dispatch();
        assert!(collector.events.lock().is_empty());
    }
}
