//! The shared region: block arena, free-list stack, pending FIFO, and the
//! process-wide named-region registry.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;

use super::{Block, BlockId, Semaphore};

/// Sizing knobs for a shared region.
#[derive(Debug, Clone, Copy)]
pub struct RegionConfig {
    /// Number of message blocks in the region.
    pub blocks: usize,
    /// Hard per-message payload size ceiling in bytes. Oversized payloads
    /// are rejected, never truncated.
    pub max_message: usize,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            blocks: 2000,
            max_message: 16 * 1024,
        }
    }
}

/// Errors from region lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum RegionError {
    /// A region with this name already exists.
    #[error("shared region \"{0}\" already exists")]
    AlreadyExists(String),
    /// No region with this name exists.
    #[error("shared region \"{0}\" not found")]
    NotFound(String),
}

/// Registry of named regions, the `shm_open` analog.
static REGISTRY: LazyLock<Mutex<HashMap<String, Arc<SharedRegion>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// A fixed array of message blocks shared by all workers of one node
/// group, plus the pool/queue metadata guarding them.
///
/// - The free list is a stack of unborrowed block ids; its counting
///   semaphore makes [`acquire_free_block`](Self::acquire_free_block)
///   block (never fail) when all slots are outstanding.
/// - The pending queue is a FIFO of blocks awaiting the delivery loop.
///   FIFO order is the only ordering guarantee.
pub struct SharedRegion {
    nodes: usize,
    config: RegionConfig,
    blocks: Vec<Block>,
    free: Mutex<Vec<BlockId>>,
    free_count: Semaphore,
    pending: Mutex<VecDeque<BlockId>>,
    pending_count: Semaphore,
}

impl SharedRegion {
    fn new(nodes: usize, config: RegionConfig) -> Self {
        let blocks: Vec<Block> = (0..config.blocks).map(|_| Block::new()).collect();
        // Stack initialized full: every block starts free.
        let free: Vec<BlockId> = (0..config.blocks).rev().map(BlockId).collect();
        Self {
            nodes,
            config,
            blocks,
            free: Mutex::new(free),
            free_count: Semaphore::new(config.blocks),
            pending: Mutex::new(VecDeque::with_capacity(config.blocks)),
            pending_count: Semaphore::new(0),
        }
    }

    /// Creates and registers a new named region.
    ///
    /// Called once by the coordinator before any worker opens the region.
    /// `nodes` is the total worker count, immutable for the region's
    /// lifetime.
    pub fn create(
        name: &str,
        nodes: usize,
        config: RegionConfig,
    ) -> Result<Arc<Self>, RegionError> {
        let mut registry = REGISTRY.lock();
        if registry.contains_key(name) {
            return Err(RegionError::AlreadyExists(name.to_string()));
        }
        let region = Arc::new(Self::new(nodes, config));
        registry.insert(name.to_string(), Arc::clone(&region));
        Ok(region)
    }

    /// Opens an existing named region.
    pub fn open(name: &str) -> Result<Arc<Self>, RegionError> {
        REGISTRY
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| RegionError::NotFound(name.to_string()))
    }

    /// Removes a named region from the registry.
    ///
    /// Workers still holding an `Arc` keep the region alive; new opens
    /// fail. Called after the query session ends.
    pub fn remove(name: &str) -> Result<(), RegionError> {
        REGISTRY
            .lock()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RegionError::NotFound(name.to_string()))
    }

    /// Total worker count recorded at creation.
    pub fn nodes(&self) -> usize {
        self.nodes
    }

    /// The region's sizing configuration.
    pub fn config(&self) -> &RegionConfig {
        &self.config
    }

    /// Returns the block with the given id.
    ///
    /// # Panics
    ///
    /// Panics if the id is out of range for this region; block ids never
    /// travel between regions.
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0]
    }

    /// Pops a free block, blocking until one is available.
    ///
    /// Never fails; starves only while every slot is outstanding, which
    /// is the designed backpressure signal.
    pub fn acquire_free_block(&self) -> BlockId {
        self.free_count.wait();
        let id = self
            .free
            .lock()
            .pop()
            .expect("free-list semaphore said a block was available");
        debug_assert!(id.0 < self.blocks.len());
        id
    }

    /// Returns a block to the free list and signals availability.
    pub fn release_block(&self, id: BlockId) {
        debug_assert!(id.0 < self.blocks.len());
        self.free.lock().push(id);
        self.free_count.post();
    }

    /// Appends a block to the pending FIFO for the delivery loop.
    pub fn enqueue_pending(&self, id: BlockId) {
        debug_assert!(id.0 < self.blocks.len());
        self.pending.lock().push_back(id);
        self.pending_count.post();
    }

    /// Pops the oldest pending block, blocking until one is queued.
    pub fn dequeue_pending(&self) -> BlockId {
        self.pending_count.wait();
        self.pending
            .lock()
            .pop_front()
            .expect("pending semaphore said a block was queued")
    }

    /// Number of blocks currently awaiting the delivery loop.
    pub fn pending_count(&self) -> usize {
        self.pending_count.value()
    }
}
