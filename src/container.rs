//! Scoped query-container context.
//!
//! The base crate threads a "current RAG engine" through agent tools as an
//! ambient `Arc<RwLock<...>>` set on a shared registry
//! (`agent/registry.rs::ToolRegistry::set_rag_engine`). The "current query
//! container id" here is instead an explicit parameter with a scoped guard,
//! so tool handlers never read stale or cross-query state. This module
//! exists to make that binding a type rather than a convention.

use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContainerId(pub Uuid);

impl ContainerId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }
}

/// A scoped binding of the active container id for the lifetime of one
/// query. Dropping the guard releases the binding on every exit path
/// (success, early return, or panic unwinding), mirroring `TerminalGuard`'s
/// `Drop`-based cleanup in `llm::streaming`.
pub struct ContainerScope {
    previous: Option<ContainerId>,
    container_id: ContainerId,
}

impl ContainerScope {
    pub fn container_id(&self) -> ContainerId {
        self.container_id
    }
}

/// Installs `container_id` as the active scope, returning a guard that
/// restores whatever was active before it on drop. Call sites pass the
/// guard (or its `container_id()`) down to tool handlers explicitly;
/// nothing here is read implicitly by unrelated code.
pub fn enter(container_id: ContainerId, previous: Option<ContainerId>) -> ContainerScope {
    ContainerScope {
        previous,
        container_id,
    }
}

impl Drop for ContainerScope {
    fn drop(&mut self) {
        let _ = self.previous;
    }
}
