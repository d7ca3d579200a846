/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Register file occupancy model.
//!
//! Every one of the 512 physical slots is empty, blocked (reserved
//! without an owner), owned by a temporary, or delegated to a per-byte
//! map for slots that are shared between sub-dword values. The byte
//! map of a delegated slot holds the same tags, except that a byte is
//! never delegated further.

use crate::ir::{Definition, Instruction, Operand};
use crate::{PhysReg, RegClass};
use std::collections::BTreeMap;
use std::fmt;

/// Occupancy of one slot, or of one byte in a delegated slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Slot {
    #[default]
    Empty,
    Blocked,
    Owned(u32),
    /// The slot is shared between sub-dword values; see the byte map.
    Subdword,
}

impl Slot {
    #[inline(always)]
    pub fn is_empty(self) -> bool {
        self == Slot::Empty
    }

    #[inline(always)]
    pub fn is_empty_or_blocked(self) -> bool {
        matches!(self, Slot::Empty | Slot::Blocked)
    }

    /// The owning temporary id, if any.
    #[inline(always)]
    pub fn id(self) -> Option<u32> {
        match self {
            Slot::Owned(id) => Some(id),
            _ => None,
        }
    }
}

/// A half-open interval of whole slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhysRegInterval {
    lo: PhysReg,
    pub size: u32,
}

impl PhysRegInterval {
    #[inline(always)]
    pub fn new(lo: PhysReg, size: u32) -> Self {
        PhysRegInterval {
            lo: PhysReg::new(lo.reg()),
            size,
        }
    }

    /// The interval from `first` up to but excluding `end`.
    #[inline(always)]
    pub fn from_until(first: PhysReg, end: PhysReg) -> Self {
        PhysRegInterval::new(first, end.reg().saturating_sub(first.reg()))
    }

    #[inline(always)]
    pub fn lo(&self) -> PhysReg {
        self.lo
    }

    /// Exclusive upper bound.
    #[inline(always)]
    pub fn hi(&self) -> PhysReg {
        self.lo.plus_slots(self.size)
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Moves the interval `slots` slots up.
    #[inline(always)]
    pub fn advance(&mut self, slots: u32) {
        self.lo = self.lo.plus_slots(slots);
    }

    #[inline(always)]
    pub fn contains_reg(&self, reg: PhysReg) -> bool {
        self.lo <= reg && reg < self.hi()
    }

    #[inline(always)]
    pub fn contains(&self, needle: &PhysRegInterval) -> bool {
        needle.lo >= self.lo && needle.hi() <= self.hi()
    }

    #[inline(always)]
    pub fn intersects(&self, other: &PhysRegInterval) -> bool {
        self.hi() > other.lo && other.hi() > self.lo
    }

    /// The slots of the interval in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = PhysReg> {
        (self.lo.reg()..self.lo.reg() + self.size).map(PhysReg::new)
    }
}

impl fmt::Display for PhysRegInterval {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}, {})", self.lo, self.hi())
    }
}

#[derive(Clone)]
pub struct RegisterFile {
    regs: [Slot; 512],
    /// Byte occupancy of every slot tagged `Slot::Subdword`.
    subdword_regs: BTreeMap<u32, [Slot; 4]>,
}

impl Default for RegisterFile {
    fn default() -> Self {
        RegisterFile::new()
    }
}

impl RegisterFile {
    pub fn new() -> Self {
        RegisterFile {
            regs: [Slot::Empty; 512],
            subdword_regs: BTreeMap::new(),
        }
    }

    /// The raw tag of the slot containing `reg`.
    #[inline(always)]
    pub fn slot(&self, reg: PhysReg) -> Slot {
        self.regs[reg.reg() as usize]
    }

    /// True if anything, even a reservation, occupies the slot.
    #[inline(always)]
    pub fn is_occupied(&self, reg: PhysReg) -> bool {
        !self.slot(reg).is_empty()
    }

    pub fn subdword_regs(&self) -> impl Iterator<Item = (PhysReg, &[Slot; 4])> {
        self.subdword_regs
            .iter()
            .map(|(&slot, bytes)| (PhysReg::new(slot), bytes))
    }

    fn bytes_of(&self, slot: u32) -> &[Slot; 4] {
        match self.subdword_regs.get(&slot) {
            Some(bytes) => bytes,
            None => panic!("slot {} delegated without byte map", slot),
        }
    }

    /// Number of completely empty slots in `interval`.
    pub fn count_zero(&self, interval: PhysRegInterval) -> u32 {
        interval.iter().filter(|&r| self.slot(r).is_empty()).count() as u32
    }

    /// Whether any byte of `num_bytes` bytes from `start` is owned or
    /// blocked.
    pub fn test(&self, start: PhysReg, num_bytes: u32) -> bool {
        let end = start.reg_b() + num_bytes;
        let mut i = start;
        while i.reg_b() < end {
            debug_assert!(i.reg() < 512);
            match self.slot(i) {
                Slot::Owned(_) | Slot::Blocked => return true,
                Slot::Subdword => {
                    let bytes = self.bytes_of(i.reg());
                    let mut j = i.byte();
                    while i.reg() * 4 + j < end && j < 4 {
                        if !bytes[j as usize].is_empty() {
                            return true;
                        }
                        j += 1;
                    }
                }
                Slot::Empty => {}
            }
            i = PhysReg::new(i.reg() + 1);
        }
        false
    }

    /// Reserves the registers of class `rc` at `start` without an owner.
    pub fn block(&mut self, start: PhysReg, rc: RegClass) {
        if rc.is_subdword() {
            self.fill_subdword(start, rc.bytes(), Slot::Blocked);
        } else {
            self.fill_slots(start, rc.size(), Slot::Blocked);
        }
    }

    /// Whether `start`, or any byte after it in the same slot, is
    /// blocked.
    pub fn is_blocked(&self, start: PhysReg) -> bool {
        match self.slot(start) {
            Slot::Blocked => true,
            Slot::Subdword => self.bytes_of(start.reg())[start.byte() as usize..]
                .iter()
                .any(|&b| b == Slot::Blocked),
            _ => false,
        }
    }

    pub fn is_empty_or_blocked(&self, start: PhysReg) -> bool {
        match self.slot(start) {
            Slot::Subdword => self.bytes_of(start.reg())[start.byte() as usize].is_empty_or_blocked(),
            slot => slot.is_empty_or_blocked(),
        }
    }

    pub fn clear(&mut self, start: PhysReg, rc: RegClass) {
        if rc.is_subdword() {
            self.fill_subdword(start, rc.bytes(), Slot::Empty);
        } else {
            self.fill_slots(start, rc.size(), Slot::Empty);
        }
    }

    pub fn clear_operand(&mut self, op: &Operand) {
        self.clear(op.phys_reg(), op.reg_class());
    }

    pub fn clear_definition(&mut self, def: &Definition) {
        self.clear(def.phys_reg(), def.reg_class());
    }

    /// Marks the registers of class `rc` at `start` as owned by `id`.
    pub fn fill_temp(&mut self, start: PhysReg, rc: RegClass, id: u32) {
        if rc.is_subdword() {
            self.fill_subdword(start, rc.bytes(), Slot::Owned(id));
        } else {
            self.fill_slots(start, rc.size(), Slot::Owned(id));
        }
    }

    pub fn fill(&mut self, def: &Definition) {
        self.fill_temp(def.phys_reg(), def.reg_class(), def.temp_id());
    }

    pub fn fill_operand(&mut self, op: &Operand) {
        self.fill_temp(op.phys_reg(), op.reg_class(), op.temp_id());
    }

    /// Re-occupies the registers of fixed operands that die at
    /// `instr`, so they are not handed out while its copies are made.
    pub fn fill_killed_operands(&mut self, instr: &Instruction) {
        for op in &instr.operands {
            if op.is_fixed() && op.is_first_kill_before_def() {
                self.fill_operand(op);
            }
        }
    }

    /// The byte-resolved occupancy at `reg`. Never `Slot::Subdword`.
    pub fn get_id(&self, reg: PhysReg) -> Slot {
        match self.slot(reg) {
            Slot::Subdword => self.bytes_of(reg.reg())[reg.byte() as usize],
            slot => slot,
        }
    }

    /// The distinct ids of all temporaries in `interval`, in order of
    /// first occurrence. Blocked slots are skipped.
    pub fn find_vars(&self, interval: PhysRegInterval) -> Vec<u32> {
        let mut vars: Vec<u32> = Vec::new();
        let mut push = |slot: Slot| {
            if let Slot::Owned(id) = slot {
                if !vars.contains(&id) {
                    vars.push(id);
                }
            }
        };
        for reg in interval.iter() {
            if self.is_blocked(reg) {
                continue;
            }
            match self.slot(reg) {
                Slot::Subdword => {
                    for &byte in self.bytes_of(reg.reg()) {
                        push(byte);
                    }
                }
                slot => push(slot),
            }
        }
        vars
    }

    fn fill_slots(&mut self, start: PhysReg, size: u32, value: Slot) {
        for i in 0..size {
            self.regs[(start.reg() + i) as usize] = value;
        }
    }

    fn fill_subdword(&mut self, start: PhysReg, num_bytes: u32, value: Slot) {
        let end = start.reg_b() + num_bytes;
        let num_slots = (end + 3) / 4 - start.reg();
        self.fill_slots(start, num_slots, Slot::Subdword);
        let mut i = start;
        while i.reg_b() < end {
            let slot = i.reg();
            let bytes = self.subdword_regs.entry(slot).or_insert([Slot::Empty; 4]);
            let mut j = i.byte();
            while slot * 4 + j < end && j < 4 {
                bytes[j as usize] = value;
                j += 1;
            }
            if bytes.iter().all(|b| b.is_empty()) {
                self.subdword_regs.remove(&slot);
                self.regs[slot as usize] = Slot::Empty;
            }
            i = PhysReg::new(slot + 1);
        }
    }
}

impl fmt::Debug for RegisterFile {
    /// One character per slot of the occupied part of each file:
    /// `.` empty, `#` blocked, `s` shared by sub-dword values, and the
    /// owner id modulo 36 otherwise.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (name, range) in [("sgpr", 0..256usize), ("vgpr", 256..512usize)] {
            let last = range
                .clone()
                .rev()
                .find(|&i| !self.regs[i].is_empty())
                .map(|i| i + 1)
                .unwrap_or(range.start);
            let line: String = self.regs[range.start..last]
                .iter()
                .map(|slot| match slot {
                    Slot::Empty => '.',
                    Slot::Blocked => '#',
                    Slot::Subdword => 's',
                    Slot::Owned(id) => std::char::from_digit(id % 36, 36).unwrap_or('?'),
                })
                .collect();
            writeln!(f, "{}: {}", name, line)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_and_test_dwords() {
        let mut file = RegisterFile::new();
        file.fill_temp(PhysReg::vgpr(2), RegClass::V2, 7);
        assert!(file.test(PhysReg::vgpr(3), 4));
        assert!(!file.test(PhysReg::vgpr(4), 8));
        assert_eq!(file.get_id(PhysReg::vgpr(3)), Slot::Owned(7));
        assert_eq!(
            file.count_zero(PhysRegInterval::new(PhysReg::vgpr(0), 4)),
            2
        );
        file.clear(PhysReg::vgpr(2), RegClass::V2);
        assert!(!file.test(PhysReg::vgpr(0), 16));
    }

    #[test]
    fn subdword_round_trip() {
        let mut file = RegisterFile::new();
        let reg = PhysReg::vgpr(5).advance(2);
        file.fill_temp(reg, RegClass::V2B, 3);
        assert_eq!(file.slot(reg), Slot::Subdword);
        assert!(file.test(reg, 2));
        assert!(!file.test(PhysReg::vgpr(5), 2));
        assert_eq!(file.get_id(reg), Slot::Owned(3));
        assert_eq!(file.get_id(PhysReg::vgpr(5)), Slot::Empty);

        file.clear(reg, RegClass::V2B);
        assert_eq!(file.slot(reg), Slot::Empty);
        assert_eq!(file.subdword_regs().count(), 0);
        assert!(file
            .find_vars(PhysRegInterval::new(PhysReg::vgpr(0), 8))
            .is_empty());
    }

    #[test]
    fn subdword_straddles_slots() {
        let mut file = RegisterFile::new();
        let reg = PhysReg::vgpr(1).advance(2);
        file.fill_temp(reg, RegClass::V4B, 9);
        assert_eq!(file.slot(PhysReg::vgpr(1)), Slot::Subdword);
        assert_eq!(file.slot(PhysReg::vgpr(2)), Slot::Subdword);
        assert!(file.test(PhysReg::vgpr(2), 1));
        assert!(!file.test(PhysReg::vgpr(2).advance(2), 2));
        file.clear(reg, RegClass::V4B);
        assert!(!file.test(PhysReg::vgpr(0), 16));
    }

    #[test]
    fn blocked_bytes() {
        let mut file = RegisterFile::new();
        file.block(PhysReg::vgpr(0).advance(2), RegClass::V2B);
        file.fill_temp(PhysReg::vgpr(0), RegClass::V2B, 4);
        assert!(file.is_blocked(PhysReg::vgpr(0)));
        assert!(file.is_empty_or_blocked(PhysReg::vgpr(0).advance(2)));
        assert!(!file.is_empty_or_blocked(PhysReg::vgpr(0)));
        // A slot with any blocked byte is skipped entirely.
        assert!(file
            .find_vars(PhysRegInterval::new(PhysReg::vgpr(0), 1))
            .is_empty());
    }

    #[test]
    fn find_vars_order() {
        let mut file = RegisterFile::new();
        file.fill_temp(PhysReg::sgpr(0), RegClass::S2, 5);
        file.fill_temp(PhysReg::sgpr(2), RegClass::S1, 2);
        file.block(PhysReg::sgpr(3), RegClass::S1);
        file.fill_temp(PhysReg::sgpr(4), RegClass::S1, 5);
        assert_eq!(
            file.find_vars(PhysRegInterval::new(PhysReg::sgpr(0), 6)),
            vec![5, 2]
        );
    }

    #[test]
    fn find_vars_lists_each_temp_once() {
        let mut file = RegisterFile::new();
        file.fill_temp(PhysReg::vgpr(0), RegClass::V2B, 3);
        file.fill_temp(PhysReg::vgpr(0).advance(2), RegClass::V1B, 4);
        file.fill_temp(PhysReg::vgpr(0).advance(3), RegClass::V1B, 3);
        file.fill_temp(PhysReg::vgpr(1), RegClass::V1, 4);
        file.fill_temp(PhysReg::vgpr(2), RegClass::V1, 7);
        assert_eq!(
            file.find_vars(PhysRegInterval::new(PhysReg::vgpr(0), 3)),
            vec![3, 4, 7]
        );
    }

    #[test]
    fn interval_ops() {
        let a = PhysRegInterval::new(PhysReg::sgpr(4), 4);
        let b = PhysRegInterval::from_until(PhysReg::sgpr(6), PhysReg::sgpr(10));
        assert!(a.intersects(&b));
        assert!(!a.contains(&b));
        assert!(a.contains(&PhysRegInterval::new(PhysReg::sgpr(5), 2)));
        assert!(a.contains_reg(PhysReg::sgpr(7)));
        assert!(!a.contains_reg(PhysReg::sgpr(8)));
        let mut c = a;
        c.advance(4);
        assert!(!a.intersects(&c));
        assert_eq!(c.lo(), PhysReg::sgpr(8));
    }
}
