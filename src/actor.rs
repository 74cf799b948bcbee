//! The actor tree.
//!
//! Actors can have parent and child actors. Shutting down an actor shuts down
//! its children. Each actor owns an abort signal which aborts when it shuts
//! down, so tasks, loads and timers can be tied to the actor's lifetime.
//!
//! Screens and their helpers are actors. Actors with no parent live in an
//! `ActorRegistry`, which exists mostly so the tree can be dumped for debugging.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use log::{debug, error, warn};
use parking_lot::Mutex;

use crate::signal::{AbortController, AbortSignal};

/// Walking more parents than this means the parent links form a loop.
pub const MAX_ANCESTOR_DEPTH: usize = 10000;

static NEXT_ACTOR_ID: AtomicU64 = AtomicU64::new(1);

/// Called on every actor in a subtree when the visibility of the subtree's root
/// changes. The second argument is the actor whose visibility changed.
pub type VisibilityHook = Arc<dyn Fn(&Actor, &Actor) + Send + Sync>;

/// Top-level actors (actors with no parent).
#[derive(Clone, Default)]
pub struct ActorRegistry {
    top: Arc<Mutex<Vec<Actor>>>,
}

impl ActorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn top_level(&self) -> Vec<Actor> {
        self.top.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.top.lock().is_empty()
    }

    /// Log the actor tree at debug level.
    pub fn dump_actors(&self) {
        for actor in self.top_level() {
            for node in actor.descendants(true) {
                let depth = node.ancestors(false).count();
                debug!("{}{}", "  ".repeat(depth), node);
            }
        }
    }

    fn add(&self, actor: Actor) {
        self.top.lock().push(actor);
    }

    fn remove(&self, actor: &Actor) -> bool {
        let mut top = self.top.lock();
        match top.iter().position(|a| a == actor) {
            Some(idx) => {
                top.remove(idx);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for ActorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorRegistry")
            .field("top_level", &self.top.lock().len())
            .finish()
    }
}

#[derive(Default)]
pub struct ActorOptions {
    pub name: String,
    pub parent: Option<Actor>,
    /// Shut down when this aborts instead of inheriting the parent's signal.
    pub signal: Option<AbortSignal>,
    pub on_visible_recursively_changed: Option<VisibilityHook>,
}

impl ActorOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn parent(mut self, parent: &Actor) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn on_visible_recursively_changed(mut self, hook: VisibilityHook) -> Self {
        self.on_visible_recursively_changed = Some(hook);
        self
    }
}

struct ActorInner {
    id: u64,
    name: String,
    registry: ActorRegistry,
    parent: Mutex<Option<Weak<ActorInner>>>,
    children: Mutex<Vec<Actor>>,
    shutdown_signal: AbortController,
    visible: AtomicBool,
    visibility_hook: Option<VisibilityHook>,
}

/// A handle to a node in the actor tree. Clones refer to the same actor.
#[derive(Clone)]
pub struct Actor {
    inner: Arc<ActorInner>,
}

impl Actor {
    pub fn new(registry: &ActorRegistry, options: ActorOptions) -> Self {
        let ActorOptions {
            name,
            parent,
            signal,
            on_visible_recursively_changed,
        } = options;

        let actor = Actor {
            inner: Arc::new(ActorInner {
                id: NEXT_ACTOR_ID.fetch_add(1, Ordering::Relaxed),
                name,
                registry: registry.clone(),
                parent: Mutex::new(parent.as_ref().map(|p| Arc::downgrade(&p.inner))),
                children: Mutex::new(Vec::new()),
                shutdown_signal: AbortController::new(),
                visible: AtomicBool::new(true),
                visibility_hook: on_visible_recursively_changed,
            }),
        };

        // Register in the parent's child list, or as a top-level actor.
        match &parent {
            Some(parent) => parent.inner.children.lock().push(actor.clone()),
            None => registry.add(actor.clone()),
        }

        // Without an explicit signal, inherit the parent's so we shut down along
        // with it. The listener goes away if we shut down first.
        let signal = signal.or_else(|| parent.as_ref().map(|p| p.signal()));
        if let Some(signal) = signal {
            let weak = Arc::downgrade(&actor.inner);
            signal.add_listener_until(
                move || {
                    if let Some(inner) = weak.upgrade() {
                        Actor { inner }.shutdown();
                    }
                },
                &actor.signal(),
            );
        }

        actor
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The signal that aborts when this actor shuts down.
    pub fn signal(&self) -> AbortSignal {
        self.inner.shutdown_signal.signal()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown_signal.is_aborted()
    }

    pub fn parent(&self) -> Option<Actor> {
        let parent = self.inner.parent.lock();
        parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Actor { inner })
    }

    pub fn children(&self) -> Vec<Actor> {
        self.inner.children.lock().clone()
    }

    /// Shut down this actor and, through its signal, its children.
    pub fn shutdown(&self) {
        // We should only be shut down once.
        if !self.inner.shutdown_signal.abort() {
            error!("Actor has already shut down: {self}");
            return;
        }

        // All of our children should have shut down and removed themselves.
        for child in self.children() {
            warn!("Child of {self} didn't shut down: {child}");
        }

        let had_parent = self.inner.parent.lock().is_some();
        match self.parent() {
            Some(parent) => parent.child_removed(self),
            None if had_parent => warn!("Parent of {self} went away before it shut down"),
            None => {
                if !self.inner.registry.remove(self) {
                    warn!("Top-level actor wasn't registered: {self}");
                }
            }
        }
    }

    fn child_removed(&self, child: &Actor) {
        let mut children = self.inner.children.lock();
        match children.iter().position(|c| c == child) {
            Some(idx) => {
                children.remove(idx);
            }
            None => warn!("Actor wasn't in the child list of {self}: {child}"),
        }
    }

    /// Iterate over the parents of this actor, nearest first.
    ///
    /// Panics if the parent links contain a loop.
    pub fn ancestors(&self, include_self: bool) -> Ancestors {
        Ancestors {
            next: if include_self {
                Some(self.clone())
            } else {
                self.parent()
            },
            steps: 0,
        }
    }

    /// Iterate over the subtree below this actor, depth-first. Each call
    /// starts a fresh traversal of the current tree.
    pub fn descendants(&self, include_self: bool) -> Descendants {
        let stack = if include_self {
            vec![self.clone()]
        } else {
            self.children().into_iter().rev().collect()
        };
        Descendants { stack }
    }

    pub fn visible(&self) -> bool {
        self.inner.visible.load(Ordering::SeqCst)
    }

    pub fn set_visible(&self, visible: bool) {
        if self.inner.visible.swap(visible, Ordering::SeqCst) == visible {
            return;
        }
        self.call_visible_recursively_changed();
    }

    /// True if we and all of our ancestors are visible.
    pub fn visible_recursively(&self) -> bool {
        self.ancestors(true).all(|actor| actor.visible())
    }

    fn call_visible_recursively_changed(&self) {
        for actor in self.descendants(true) {
            if let Some(hook) = &actor.inner.visibility_hook {
                hook(&actor, self);
            }
        }
    }

    #[cfg(test)]
    fn set_parent_unchecked(&self, parent: &Actor) {
        *self.inner.parent.lock() = Some(Arc::downgrade(&parent.inner));
    }
}

impl PartialEq for Actor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Actor {}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.inner.name.is_empty() {
            write!(f, "actor#{}", self.inner.id)
        } else {
            write!(f, "{}#{}", self.inner.name, self.inner.id)
        }
    }
}

impl fmt::Debug for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actor")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("visible", &self.visible())
            .field("shut_down", &self.is_shut_down())
            .field("children", &self.inner.children.lock().len())
            .finish()
    }
}

pub struct Ancestors {
    next: Option<Actor>,
    steps: usize,
}

impl Iterator for Ancestors {
    type Item = Actor;

    fn next(&mut self) -> Option<Actor> {
        let current = self.next.take()?;
        self.next = current.parent();
        if self.next.is_some() {
            self.steps += 1;
            if self.steps > MAX_ANCESTOR_DEPTH {
                panic!("recursion detected walking the ancestors of {current}");
            }
        }
        Some(current)
    }
}

pub struct Descendants {
    stack: Vec<Actor>,
}

impl Iterator for Descendants {
    type Item = Actor;

    fn next(&mut self) -> Option<Actor> {
        let actor = self.stack.pop()?;
        self.stack.extend(actor.children().into_iter().rev());
        Some(actor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn child(registry: &ActorRegistry, name: &str, parent: &Actor) -> Actor {
        Actor::new(registry, ActorOptions::named(name).parent(parent))
    }

    #[test]
    fn test_construct_registers_once() {
        let registry = ActorRegistry::new();
        let root = Actor::new(&registry, ActorOptions::named("root"));
        let a = child(&registry, "a", &root);

        assert_eq!(registry.top_level(), vec![root.clone()]);
        assert_eq!(root.children(), vec![a.clone()]);
        assert_eq!(a.parent(), Some(root.clone()));
    }

    #[test]
    fn test_shutdown_cascades_and_empties_children() {
        let registry = ActorRegistry::new();
        let root = Actor::new(&registry, ActorOptions::named("root"));
        let a = child(&registry, "a", &root);
        let b = child(&registry, "b", &root);
        let a1 = child(&registry, "a1", &a);
        let a2 = child(&registry, "a2", &a);
        let a11 = child(&registry, "a11", &a1);

        root.shutdown();

        for actor in [&root, &a, &b, &a1, &a2, &a11] {
            assert!(actor.is_shut_down(), "{actor} still running");
            assert!(actor.children().is_empty(), "{actor} kept children");
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_double_shutdown_is_reported_not_repeated() {
        let registry = ActorRegistry::new();
        let root = Actor::new(&registry, ActorOptions::named("root"));
        let a = child(&registry, "a", &root);
        let keep = child(&registry, "keep", &root);

        let aborts = Arc::new(AtomicUsize::new(0));
        let counter = aborts.clone();
        a.signal().add_listener(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        a.shutdown();
        a.shutdown();

        assert_eq!(aborts.load(Ordering::SeqCst), 1);
        assert_eq!(root.children(), vec![keep]);

        // The parent shutting down later doesn't shut a down again.
        root.shutdown();
        assert_eq!(aborts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_explicit_signal_child_is_a_straggler() {
        let registry = ActorRegistry::new();
        let root = Actor::new(&registry, ActorOptions::named("root"));
        let independent = AbortController::new();
        let a = Actor::new(
            &registry,
            ActorOptions::named("independent")
                .parent(&root)
                .signal(independent.signal()),
        );

        root.shutdown();
        assert!(!a.is_shut_down());
        assert_eq!(root.children(), vec![a.clone()]);

        independent.abort();
        assert!(a.is_shut_down());
        assert!(root.children().is_empty());
    }

    #[test]
    fn test_child_of_shut_down_parent_shuts_down_immediately() {
        let registry = ActorRegistry::new();
        let root = Actor::new(&registry, ActorOptions::named("root"));
        root.shutdown();

        let late = child(&registry, "late", &root);
        assert!(late.is_shut_down());
        assert!(root.children().is_empty());
    }

    #[test]
    fn test_visible_recursively() {
        let registry = ActorRegistry::new();
        let root = Actor::new(&registry, ActorOptions::named("root"));
        let mut chain = vec![root.clone()];
        for i in 0..20 {
            let next = child(&registry, &format!("n{i}"), chain.last().unwrap());
            chain.push(next);
        }
        let leaf = chain.last().unwrap().clone();
        assert!(leaf.visible_recursively());

        for hidden in &chain {
            hidden.set_visible(false);
            assert!(!leaf.visible_recursively(), "{hidden} hidden");
            hidden.set_visible(true);
        }
        assert!(leaf.visible_recursively());
    }

    #[test]
    fn test_visibility_change_notifies_subtree() {
        let registry = ActorRegistry::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let hook: VisibilityHook = {
            let calls = calls.clone();
            Arc::new(move |actor: &Actor, origin: &Actor| {
                calls
                    .lock()
                    .push((actor.name().to_string(), origin.name().to_string()));
            })
        };

        let root = Actor::new(
            &registry,
            ActorOptions::named("root").on_visible_recursively_changed(hook.clone()),
        );
        let a = Actor::new(
            &registry,
            ActorOptions::named("a")
                .parent(&root)
                .on_visible_recursively_changed(hook.clone()),
        );
        let _b = Actor::new(
            &registry,
            ActorOptions::named("b")
                .parent(&a)
                .on_visible_recursively_changed(hook),
        );

        a.set_visible(false);
        // Unchanged: no notification.
        a.set_visible(false);

        let calls = calls.lock().clone();
        assert_eq!(
            calls,
            vec![
                ("a".to_string(), "a".to_string()),
                ("b".to_string(), "a".to_string()),
            ]
        );
    }

    #[test]
    fn test_descendants_depth_first_and_restartable() {
        let registry = ActorRegistry::new();
        let root = Actor::new(&registry, ActorOptions::named("root"));
        let a = child(&registry, "a", &root);
        child(&registry, "a1", &a);
        child(&registry, "b", &root);

        let names = |it: Descendants| it.map(|a| a.name().to_string()).collect::<Vec<_>>();
        assert_eq!(names(root.descendants(true)), ["root", "a", "a1", "b"]);
        assert_eq!(names(root.descendants(false)), ["a", "a1", "b"]);

        a.shutdown();
        assert_eq!(names(root.descendants(false)), ["b"]);
    }

    #[test]
    fn test_ancestors() {
        let registry = ActorRegistry::new();
        let root = Actor::new(&registry, ActorOptions::named("root"));
        let a = child(&registry, "a", &root);
        let a1 = child(&registry, "a1", &a);

        let names: Vec<_> = a1.ancestors(true).map(|a| a.name().to_string()).collect();
        assert_eq!(names, ["a1", "a", "root"]);
        assert_eq!(a1.ancestors(false).count(), 2);
    }

    #[test]
    #[should_panic(expected = "recursion detected")]
    fn test_ancestor_cycle_is_fatal() {
        let registry = ActorRegistry::new();
        let root = Actor::new(&registry, ActorOptions::named("root"));
        let a = child(&registry, "a", &root);
        root.set_parent_unchecked(&a);

        let _ = a.ancestors(false).count();
    }
}
