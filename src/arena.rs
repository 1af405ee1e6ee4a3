//! Arena ownership of blocks and ports, plus the leaf identity caches.
//!
//! Blocks and ports are collaborator objects owned by the arena behind
//! stable [`BlockId`]/[`PortId`] handles. The arena also owns the two
//! memoization tables that give [`Parameter`] and [`SignalReference`]
//! leaves their uniqueness guarantees:
//!
//! - parameters are cached per `(block, index)`: repeated requests return
//!   an equal leaf
//! - signal references are cached per port: repeated requests return an
//!   equal leaf while the entry is live; once invalidated (explicitly or by
//!   removing the port), the next request mints a fresh instance with a new
//!   generation that does not compare equal to any stale copy
//!
//! Removing an arena entry invalidates its cached leaves. The
//! check-then-insert sequences are guarded by `&mut self`, so the caches
//! need no further synchronization in the single-threaded usage model.

use std::collections::HashMap;

use crate::errors::ArenaError;
use crate::symbols::{Block, Parameter, Port, SignalReference};

/// Stable handle to a block owned by the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u64);

impl BlockId {
    /// The raw handle value, usable as an external cache key.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Stable handle to a port owned by the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(u64);

impl PortId {
    /// The raw handle value, usable as an external cache key.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Owner of blocks, ports and the parameter/signal leaf caches.
#[derive(Default)]
pub struct ModelArena {
    blocks: HashMap<BlockId, Box<dyn Block>>,
    ports: HashMap<PortId, Box<dyn Port>>,
    parameters: HashMap<(BlockId, usize), Parameter>,
    signals: HashMap<PortId, SignalReference>,
    next_handle: u64,
    next_generation: u64,
}

impl ModelArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes ownership of a block, returning its stable handle.
    pub fn insert_block(&mut self, block: Box<dyn Block>) -> BlockId {
        let id = BlockId(self.next_handle);
        self.next_handle += 1;
        self.blocks.insert(id, block);
        id
    }

    /// Takes ownership of a port, returning its stable handle.
    pub fn insert_port(&mut self, port: Box<dyn Port>) -> PortId {
        let id = PortId(self.next_handle);
        self.next_handle += 1;
        self.ports.insert(id, port);
        id
    }

    pub fn block(&self, id: BlockId) -> Option<&dyn Block> {
        self.blocks.get(&id).map(|b| b.as_ref())
    }

    pub fn port(&self, id: PortId) -> Option<&dyn Port> {
        self.ports.get(&id).map(|p| p.as_ref())
    }

    /// Removes a block, invalidating its cached parameter leaves.
    pub fn remove_block(&mut self, id: BlockId) -> Option<Box<dyn Block>> {
        self.parameters.retain(|(block, _), _| *block != id);
        self.blocks.remove(&id)
    }

    /// Removes a port, invalidating its cached signal reference.
    pub fn remove_port(&mut self, id: PortId) -> Option<Box<dyn Port>> {
        self.signals.remove(&id);
        self.ports.remove(&id)
    }

    /// The memoized parameter leaf for `(block, index)`.
    ///
    /// # Errors
    /// * [`ArenaError::UnknownBlock`] if the handle is stale
    /// * [`ArenaError::InvalidParameterIndex`] if the index is out of range
    pub fn parameter(&mut self, block: BlockId, index: usize) -> Result<Parameter, ArenaError> {
        let names = self
            .blocks
            .get(&block)
            .ok_or(ArenaError::UnknownBlock(block.0))?
            .parameters();
        if index >= names.len() {
            return Err(ArenaError::InvalidParameterIndex {
                index,
                len: names.len(),
            });
        }
        let name = names[index].clone();
        Ok(self
            .parameters
            .entry((block, index))
            .or_insert_with(|| Parameter::new(block, index, name))
            .clone())
    }

    /// Resolves a parameter by name, then memoizes by index as usual.
    ///
    /// # Errors
    /// [`ArenaError::UnknownParameterName`] if the block has no parameter
    /// with that name.
    pub fn parameter_by_name(
        &mut self,
        block: BlockId,
        name: &str,
    ) -> Result<Parameter, ArenaError> {
        let index = self
            .blocks
            .get(&block)
            .ok_or(ArenaError::UnknownBlock(block.0))?
            .find_parameter(name)
            .ok_or_else(|| ArenaError::UnknownParameterName(name.to_string()))?;
        self.parameter(block, index)
    }

    /// The memoized signal reference for a port.
    ///
    /// While the cache entry is live, repeated calls return an equal leaf.
    /// After invalidation the next call mints a distinct instance.
    pub fn signal(&mut self, port: PortId) -> Result<SignalReference, ArenaError> {
        let len = self
            .ports
            .get(&port)
            .ok_or(ArenaError::UnknownPort(port.0))?
            .len();
        if let Some(existing) = self.signals.get(&port) {
            return Ok(existing.clone());
        }
        let generation = self.next_generation;
        self.next_generation += 1;
        let signal = SignalReference::new(port, len, generation);
        self.signals.insert(port, signal.clone());
        Ok(signal)
    }

    /// Drops the cached signal reference for a port without removing the
    /// port itself. The next [`signal`](Self::signal) call mints a fresh
    /// instance.
    pub fn invalidate_signal(&mut self, port: PortId) {
        self.signals.remove(&port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Gain;

    impl Block for Gain {
        fn parameters(&self) -> &[String] {
            static NAMES: std::sync::OnceLock<Vec<String>> = std::sync::OnceLock::new();
            NAMES.get_or_init(|| vec!["gain".to_string(), "offset".to_string()])
        }
    }

    struct WidePort(usize);

    impl Port for WidePort {
        fn len(&self) -> usize {
            self.0
        }
    }

    #[test]
    fn test_parameter_memoization() {
        let mut arena = ModelArena::new();
        let block = arena.insert_block(Box::new(Gain));

        let first = arena.parameter(block, 0).unwrap();
        let second = arena.parameter(block, 0).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.name(), "gain");

        let other = arena.parameter(block, 1).unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn test_parameter_by_name() {
        let mut arena = ModelArena::new();
        let block = arena.insert_block(Box::new(Gain));

        let by_name = arena.parameter_by_name(block, "offset").unwrap();
        let by_index = arena.parameter(block, 1).unwrap();
        assert_eq!(by_name, by_index);

        let err = arena.parameter_by_name(block, "missing").unwrap_err();
        assert_eq!(err, ArenaError::UnknownParameterName("missing".to_string()));
    }

    #[test]
    fn test_parameter_index_validation() {
        let mut arena = ModelArena::new();
        let block = arena.insert_block(Box::new(Gain));

        let err = arena.parameter(block, 2).unwrap_err();
        assert_eq!(err, ArenaError::InvalidParameterIndex { index: 2, len: 2 });
    }

    #[test]
    fn test_parameter_slice() {
        let mut arena = ModelArena::new();
        let block = arena.insert_block(Box::new(Gain));

        let p = arena.parameter(block, 1).unwrap();
        let (source, slice) = p.source_and_slice();
        assert_eq!(source, block);
        assert_eq!(slice, 1..2);
    }

    #[test]
    fn test_signal_memoization_and_invalidation() {
        let mut arena = ModelArena::new();
        let port = arena.insert_port(Box::new(WidePort(3)));

        let first = arena.signal(port).unwrap();
        let again = arena.signal(port).unwrap();
        assert_eq!(first, again);

        // invalidation severs the identity: the next request is a fresh
        // instance that no stale copy compares equal to
        arena.invalidate_signal(port);
        let fresh = arena.signal(port).unwrap();
        assert_ne!(first, fresh);
        assert_eq!(fresh, arena.signal(port).unwrap());
    }

    #[test]
    fn test_removed_port_rejects_signal_requests() {
        let mut arena = ModelArena::new();
        let port = arena.insert_port(Box::new(WidePort(2)));
        arena.signal(port).unwrap();

        arena.remove_port(port);
        let err = arena.signal(port).unwrap_err();
        assert!(matches!(err, ArenaError::UnknownPort(_)));
    }
}
