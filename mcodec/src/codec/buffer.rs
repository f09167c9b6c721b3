use std::{
    collections::{BTreeMap, BTreeSet},
    ops::{Deref, DerefMut},
    sync::{Mutex, MutexGuard, PoisonError},
};

/// Sample flags carried by queued input and produced output buffers.
pub mod flags {
    pub const KEY_FRAME: u32 = 1;
    /// Buffer holds codec specific data instead of media data.
    pub const CODEC_CONFIG: u32 = 2;
    /// Last buffer of the stream.
    pub const END_OF_STREAM: u32 = 4;
    pub const PARTIAL_FRAME: u32 = 8;
}

/// Metadata of an output buffer handed to the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferInfo {
    /// Start of valid data in the buffer.
    pub offset: usize,
    /// Number of valid bytes.
    pub size: usize,
    pub presentation_time_us: i64,
    pub flags: u32,
}

impl BufferInfo {
    pub fn new(offset: usize, size: usize, presentation_time_us: i64, flags: u32) -> Self {
        Self {
            offset,
            size,
            presentation_time_us,
            flags,
        }
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags & flags::END_OF_STREAM != 0
    }
}

/// Fixed set of equally sized buffer slots addressed by index.
pub struct BufferPool {
    slots: Vec<Mutex<Vec<u8>>>,
    capacity: usize,
}

impl BufferPool {
    pub fn new(count: usize, capacity: usize) -> Self {
        Self {
            slots: (0..count).map(|_| Mutex::new(vec![0; capacity])).collect(),
            capacity,
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Size in bytes of every slot.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Lock the slot at `index`, `None` if out of range.
    pub fn slot(&self, index: usize) -> Option<SlotGuard<'_>> {
        self.slots
            .get(index)
            .map(|x| SlotGuard(x.lock().unwrap_or_else(PoisonError::into_inner)))
    }
}

/// Exclusive access to the bytes of one buffer slot.
///
/// The borrow ends before the owning session can queue or release the slot.
pub struct SlotGuard<'a>(MutexGuard<'a, Vec<u8>>);

impl Deref for SlotGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for SlotGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Buffer indices currently owned by the client.
#[derive(Debug, Default)]
pub(crate) struct Ledger {
    inputs: BTreeSet<usize>,
    outputs: BTreeMap<usize, BufferInfo>,
}

impl Ledger {
    pub(crate) fn grant_input(&mut self, index: usize) {
        self.inputs.insert(index);
    }

    pub(crate) fn grant_output(&mut self, index: usize, info: BufferInfo) {
        self.outputs.insert(index, info);
    }

    pub(crate) fn owns_input(&self, index: usize) -> bool {
        self.inputs.contains(&index)
    }

    pub(crate) fn output(&self, index: usize) -> Option<BufferInfo> {
        self.outputs.get(&index).copied()
    }

    /// Hand an input index back to the codec, false if the client did not own it.
    pub(crate) fn take_input(&mut self, index: usize) -> bool {
        self.inputs.remove(&index)
    }

    pub(crate) fn take_output(&mut self, index: usize) -> Option<BufferInfo> {
        self.outputs.remove(&index)
    }

    pub(crate) fn clear(&mut self) {
        self.inputs.clear();
        self.outputs.clear();
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }
}
