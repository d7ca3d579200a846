/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

use crate::PhysReg;

type Frame = u64;
const BITS_PER_FRAME: usize = core::mem::size_of::<Frame>() * 8;
const NUM_FRAMES: usize = 512 / BITS_PER_FRAME;

/// A set of physical register slots.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct RegSet {
    bits: [Frame; NUM_FRAMES],
}

impl RegSet {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    fn compute_index(slot: u32) -> (usize, usize) {
        let el = slot as usize;
        (el / BITS_PER_FRAME, el % BITS_PER_FRAME)
    }

    pub fn insert(&mut self, reg: PhysReg) {
        let (frame_no, idx) = Self::compute_index(reg.reg());
        self.bits[frame_no] |= 1 << idx;
    }

    /// Inserts `size` consecutive slots starting at `reg`.
    pub fn insert_range(&mut self, reg: PhysReg, size: u32) {
        for i in 0..size {
            self.insert(reg.plus_slots(i));
        }
    }

    pub fn contains(&self, reg: PhysReg) -> bool {
        let (frame_no, idx) = Self::compute_index(reg.reg());
        self.bits[frame_no] & (1 << idx) != 0
    }

    pub fn clear(&mut self) {
        self.bits = [0; NUM_FRAMES];
    }

    pub fn iter(&self) -> RegSetIter<'_> {
        RegSetIter {
            next_frame_idx: 0,
            curr_frame: 0,
            bits: &self.bits,
        }
    }
}

impl core::fmt::Debug for RegSet {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

pub struct RegSetIter<'a> {
    next_frame_idx: usize,
    curr_frame: Frame,
    bits: &'a [Frame],
}

impl<'a> Iterator for RegSetIter<'a> {
    type Item = PhysReg;

    fn next(&mut self) -> Option<PhysReg> {
        while self.curr_frame == 0 {
            if self.next_frame_idx >= self.bits.len() {
                return None;
            }
            self.curr_frame = self.bits[self.next_frame_idx];
            self.next_frame_idx += 1;
        }
        let skip = self.curr_frame.trailing_zeros();
        self.curr_frame &= !(1 << skip);
        let slot = (self.next_frame_idx - 1) * BITS_PER_FRAME + skip as usize;
        Some(PhysReg::new(slot as u32))
    }
}
