// src/motion/pipeline.rs
//
// Single-producer/single-consumer ring buffer of `MotionBlock`s. The task
// thread is the sole producer (`add`); the ramp-generator tick is the sole
// consumer (`get`/`remove`/`peek_get`). Put/get indices are atomics so the
// consumer observes a producer's write (and vice versa) without a lock.
// Grounded on RampGenerator/MotionRingBuffer.h and MotionPipeline.h.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};

use super::block::MotionBlock;

#[derive(Debug, Default)]
struct RingPosn {
    put_pos: AtomicU32,
    get_pos: AtomicU32,
    buf_len: u32,
}

impl RingPosn {
    fn new(max_len: u32) -> Self {
        Self {
            put_pos: AtomicU32::new(0),
            get_pos: AtomicU32::new(0),
            buf_len: max_len,
        }
    }

    fn clear(&self) {
        self.get_pos.store(0, Ordering::Release);
        self.put_pos.store(0, Ordering::Release);
    }

    fn size(&self) -> u32 {
        self.buf_len
    }

    fn can_put(&self) -> bool {
        if self.buf_len == 0 {
            return false;
        }
        let put = self.put_pos.load(Ordering::Acquire);
        let get = self.get_pos.load(Ordering::Acquire);
        if put == get {
            return true;
        }
        if put > get {
            (put != self.buf_len - 1) || (get != 0)
        } else {
            get - put > 1
        }
    }

    fn can_get(&self) -> bool {
        self.put_pos.load(Ordering::Acquire) != self.get_pos.load(Ordering::Acquire)
    }

    fn has_put(&self) {
        let mut put = self.put_pos.load(Ordering::Acquire) + 1;
        if put >= self.buf_len {
            put = 0;
        }
        self.put_pos.store(put, Ordering::Release);
    }

    fn has_got(&self) {
        let mut get = self.get_pos.load(Ordering::Acquire) + 1;
        if get >= self.buf_len {
            get = 0;
        }
        self.get_pos.store(get, Ordering::Release);
    }

    fn count(&self) -> u32 {
        let get = self.get_pos.load(Ordering::Acquire);
        let put = self.put_pos.load(Ordering::Acquire);
        if get <= put {
            put - get
        } else {
            self.buf_len - get + put
        }
    }

    fn remaining(&self) -> u32 {
        self.buf_len - self.count()
    }

    fn get_nth_from_put(&self, n: u32) -> Option<u32> {
        if !self.can_get() || n >= self.buf_len {
            return None;
        }
        let put = self.put_pos.load(Ordering::Acquire) as i64;
        let get = self.get_pos.load(Ordering::Acquire) as i64;
        let mut nth_pos = put - 1 - n as i64;
        if nth_pos < 0 {
            nth_pos += self.buf_len as i64;
        }
        if (nth_pos + 1 == get) || (nth_pos + 1 == self.buf_len as i64 && get == 0) {
            return None;
        }
        Some(nth_pos as u32)
    }

    fn get_nth_from_get(&self, n: u32) -> Option<u32> {
        if !self.can_get() || n >= self.buf_len {
            return None;
        }
        let get = self.get_pos.load(Ordering::Acquire);
        let put = self.put_pos.load(Ordering::Acquire);
        let mut nth_pos = get + n;
        if nth_pos >= self.buf_len {
            nth_pos -= self.buf_len;
        }
        if nth_pos == put {
            return None;
        }
        Some(nth_pos)
    }
}

/// SPSC ring buffer of motion blocks.
///
/// # Safety
/// `cells` is accessed through `UnsafeCell` so the consumer can mutate the
/// block it currently owns without going through a lock. This is sound only
/// under the single-producer/single-consumer discipline documented on
/// `add`/`get`/`peek_get_mut`: the producer only ever touches the slot at
/// `put_pos`, the consumer only the slot at `get_pos` (and slots already
/// handed off via `peek_nth_from_put`), and the atomic index updates provide
/// the release/acquire edge between them.
pub struct MotionPipeline {
    posn: RingPosn,
    cells: Vec<UnsafeCell<MotionBlock>>,
}

unsafe impl Sync for MotionPipeline {}

impl MotionPipeline {
    pub fn new() -> Self {
        Self {
            posn: RingPosn::default(),
            cells: Vec::new(),
        }
    }

    pub fn setup(&mut self, pipeline_size: usize) {
        self.cells = (0..pipeline_size).map(|_| UnsafeCell::new(MotionBlock::new())).collect();
        self.posn = RingPosn::new(pipeline_size as u32);
    }

    pub fn clear(&self) {
        self.posn.clear();
    }

    pub fn count(&self) -> u32 {
        self.posn.count()
    }

    pub fn size(&self) -> u32 {
        self.posn.size()
    }

    pub fn remaining(&self) -> u32 {
        self.posn.remaining()
    }

    pub fn can_accept(&self) -> bool {
        self.posn.can_put()
    }

    pub fn can_get(&self) -> bool {
        self.posn.can_get()
    }

    /// Writes `block` into the producer's slot. Only the producer may call
    /// this.
    pub fn add(&self, block: MotionBlock) -> bool {
        if !self.posn.can_put() {
            return false;
        }
        let put = self.posn.put_pos.load(Ordering::Acquire) as usize;
        unsafe {
            *self.cells[put].get() = block;
        }
        self.posn.has_put();
        true
    }

    /// Copies the next block out and advances the get position. Only the
    /// consumer may call this.
    pub fn get(&self) -> Option<MotionBlock> {
        if !self.posn.can_get() {
            return None;
        }
        let get = self.posn.get_pos.load(Ordering::Acquire) as usize;
        let block = unsafe { (*self.cells[get].get()).clone() };
        self.posn.has_got();
        Some(block)
    }

    /// Drops the next block without copying it out.
    pub fn remove(&self) -> bool {
        if !self.posn.can_get() {
            return false;
        }
        self.posn.has_got();
        true
    }

    /// Mutable access to the block that would next be `get`, without
    /// removing it. Only the consumer may call this.
    pub fn peek_get_mut(&self) -> Option<&mut MotionBlock> {
        if !self.posn.can_get() {
            return None;
        }
        let get = self.posn.get_pos.load(Ordering::Acquire) as usize;
        Some(unsafe { &mut *self.cells[get].get() })
    }

    /// 0 is the block most recently put in the queue, 1 the one before that.
    pub fn peek_nth_from_put(&self, n: u32) -> Option<&MotionBlock> {
        let idx = self.posn.get_nth_from_put(n)? as usize;
        Some(unsafe { &*self.cells[idx].get() })
    }

    pub fn peek_nth_from_put_mut(&self, n: u32) -> Option<&mut MotionBlock> {
        let idx = self.posn.get_nth_from_put(n)? as usize;
        Some(unsafe { &mut *self.cells[idx].get() })
    }

    /// 0 is the block next to be got, 1 the one after that.
    pub fn peek_nth_from_get(&self, n: u32) -> Option<&MotionBlock> {
        let idx = self.posn.get_nth_from_get(n)? as usize;
        Some(unsafe { &*self.cells[idx].get() })
    }

    pub fn peek_nth_from_get_mut(&self, n: u32) -> Option<&mut MotionBlock> {
        let idx = self.posn.get_nth_from_get(n)? as usize;
        Some(unsafe { &mut *self.cells[idx].get() })
    }
}

impl Default for MotionPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MotionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotionPipeline")
            .field("count", &self.count())
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_get_preserve_fifo_order() {
        let mut pipeline = MotionPipeline::new();
        pipeline.setup(4);
        for i in 0..3 {
            let mut block = MotionBlock::new();
            block.motion_tracking_index = i;
            assert!(pipeline.add(block));
        }
        assert_eq!(pipeline.count(), 3);
        for i in 0..3 {
            let block = pipeline.get().unwrap();
            assert_eq!(block.motion_tracking_index, i);
        }
        assert!(pipeline.get().is_none());
    }

    #[test]
    fn cannot_put_past_capacity_leaving_one_slot_for_disambiguation() {
        let mut pipeline = MotionPipeline::new();
        pipeline.setup(2);
        assert!(pipeline.add(MotionBlock::new()));
        assert!(!pipeline.can_accept());
        assert!(!pipeline.add(MotionBlock::new()));
    }

    #[test]
    fn peek_nth_from_put_indexes_most_recent_first() {
        let mut pipeline = MotionPipeline::new();
        pipeline.setup(4);
        for i in 0..3 {
            let mut block = MotionBlock::new();
            block.motion_tracking_index = i;
            pipeline.add(block);
        }
        assert_eq!(pipeline.peek_nth_from_put(0).unwrap().motion_tracking_index, 2);
        assert_eq!(pipeline.peek_nth_from_put(2).unwrap().motion_tracking_index, 0);
        assert!(pipeline.peek_nth_from_put(3).is_none());
    }
}
