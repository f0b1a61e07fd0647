//! Per-context connection pool
//!
//! A connection belongs to the context that created it: an OS thread for the
//! blocking client, a tokio task for the async client. Keying by context
//! keeps each connection's socket and pending-response table single-owner
//! while letting unrelated threads or tasks call concurrently.

use dashmap::DashMap;
use std::sync::Arc;
use std::thread::ThreadId;

/// Identifies the calling context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKey {
    Task(tokio::task::Id),
    Thread(ThreadId),
}

impl ContextKey {
    /// The current OS thread
    pub fn thread() -> Self {
        ContextKey::Thread(std::thread::current().id())
    }

    /// The current tokio task, or the OS thread outside of a task
    pub fn current() -> Self {
        tokio::task::try_id()
            .map(ContextKey::Task)
            .unwrap_or_else(Self::thread)
    }
}

/// Connections keyed by [`ContextKey`], created lazily by the owning client
pub struct ConnectionPool<C> {
    connections: DashMap<ContextKey, Arc<C>>,
}

impl<C> ConnectionPool<C> {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    pub fn get(&self, key: &ContextKey) -> Option<Arc<C>> {
        self.connections.get(key).map(|c| Arc::clone(c.value()))
    }

    pub fn insert(&self, key: ContextKey, connection: Arc<C>) {
        self.connections.insert(key, connection);
    }

    /// Evict a connection, e.g. after its socket failed
    pub fn remove(&self, key: &ContextKey) -> Option<Arc<C>> {
        self.connections.remove(key).map(|(_, c)| c)
    }

    /// Take every connection out of the pool
    pub fn drain(&self) -> Vec<Arc<C>> {
        let keys: Vec<ContextKey> = self.connections.iter().map(|e| *e.key()).collect();
        keys.iter().filter_map(|k| self.remove(k)).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl<C> Default for ConnectionPool<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_keys_differ() {
        let here = ContextKey::thread();
        let there = std::thread::spawn(ContextKey::current).join().unwrap();
        assert_eq!(here, ContextKey::current());
        assert_ne!(here, there);
    }

    #[tokio::test]
    async fn test_task_keys() {
        let outer = ContextKey::current();
        let inner = tokio::spawn(async { ContextKey::current() }).await.unwrap();
        assert!(matches!(inner, ContextKey::Task(_)));
        assert_ne!(outer, inner);
    }

    #[test]
    fn test_pool_lifecycle() {
        let pool = ConnectionPool::new();
        let key = ContextKey::thread();
        assert!(pool.get(&key).is_none());

        pool.insert(key, Arc::new("conn"));
        assert_eq!(pool.get(&key).as_deref(), Some(&"conn"));
        assert_eq!(pool.len(), 1);

        let drained = pool.drain();
        assert_eq!(drained.len(), 1);
        assert!(pool.is_empty());
        assert!(pool.remove(&key).is_none());
    }
}
