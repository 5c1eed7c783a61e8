//! Tracks the live buses of one application instance by scope.
//!
//! The tree itself lives in the buses' parent/child links; this registry
//! only answers "which bus currently serves scope X" and tears subtrees
//! down in the right order when a scope closes.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;

use scopebus_core::{BusId, BusResult, Scope};

use crate::bus::EventBus;

/// Registry of the live buses under one root.
pub struct BusHierarchy {
    root: EventBus,
    /// Live buses per scope, in creation order. Several buses may share a
    /// scope (e.g. two open views); the most recently opened one is the
    /// active one. Only bookkeeping runs under this lock, so it cannot
    /// be poisoned.
    active: RwLock<HashMap<Scope, Vec<EventBus>>>,
}

impl BusHierarchy {
    /// Create a hierarchy rooted at a fresh bus of the given scope.
    pub fn new(root_scope: Scope) -> Self {
        let root = EventBus::create_root(root_scope);
        let mut active = HashMap::new();
        active.insert(root_scope, vec![root.clone()]);
        Self {
            root,
            active: RwLock::new(active),
        }
    }

    pub fn root(&self) -> &EventBus {
        &self.root
    }

    /// Open and track a child bus of `parent` at `scope`.
    pub fn open_child(&self, parent: &EventBus, scope: Scope) -> BusResult<EventBus> {
        let child = parent.create_child(scope)?;
        self.active
            .write()
            .unwrap()
            .entry(scope)
            .or_default()
            .push(child.clone());
        debug!(bus = %child.id(), %scope, "bus opened");
        Ok(child)
    }

    /// Close `bus`: destroy every tracked descendant deepest-scope first,
    /// then the bus itself, and stop tracking all of them.
    pub fn close(&self, bus: &EventBus) {
        let doomed = self.collect_subtree(bus);

        // Narrowest scope first, so every bus is destroyed before its
        // parent and never observes a half-torn-down chain above it.
        let mut by_depth: Vec<&EventBus> = doomed.iter().collect();
        by_depth.sort_by_key(|b| std::cmp::Reverse(b.scope()));
        for bus in by_depth {
            bus.destroy();
        }

        let mut active = self.active.write().unwrap();
        for bus in &doomed {
            if let Some(buses) = active.get_mut(&bus.scope()) {
                buses.retain(|b| b.id() != bus.id());
            }
        }
        active.retain(|_, buses| !buses.is_empty());
        debug!(bus = %bus.id(), scope = %bus.scope(), closed = doomed.len(), "bus closed");
    }

    /// The active (most recently opened, still live) bus at `scope`, if
    /// any. Destroyed entries found along the way are dropped.
    pub fn active(&self, scope: Scope) -> Option<EventBus> {
        let mut active = self.active.write().unwrap();
        let buses = active.get_mut(&scope)?;
        buses.retain(|bus| !bus.is_destroyed());
        let found = buses.last().cloned();
        if buses.is_empty() {
            active.remove(&scope);
        }
        found
    }

    /// `bus` plus every tracked live descendant of it.
    fn collect_subtree(&self, bus: &EventBus) -> Vec<EventBus> {
        let active = self.active.read().unwrap();
        let mut doomed = vec![bus.clone()];
        let mut roots: Vec<BusId> = vec![bus.id()];

        // Walk parent links of every tracked bus up to the doomed set.
        // The tracked population is small, so a fixpoint sweep is fine.
        let mut grew = true;
        while grew {
            grew = false;
            for candidate in active.values().flatten() {
                if roots.contains(&candidate.id()) {
                    continue;
                }
                let belongs = candidate
                    .parent()
                    .is_some_and(|parent| roots.contains(&parent.id()));
                if belongs {
                    roots.push(candidate.id());
                    doomed.push(candidate.clone());
                    grew = true;
                }
            }
        }
        doomed
    }
}
