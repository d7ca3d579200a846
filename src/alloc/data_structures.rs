/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Data structures for the SSA allocator.

use crate::ir::{Definition, Operand};
use crate::{PhysReg, RegClass};
use smallvec::SmallVec;

/// Where a temporary currently lives, plus the placement hints
/// gathered before allocation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Assignment {
    pub reg: PhysReg,
    pub rc: RegClass,
    pub assigned: bool,
    /// Prefers `vcc`, e.g. the result of a compare feeding a VOP2 carry.
    pub vcc: bool,
    /// Prefers `m0`.
    pub m0: bool,
    /// Has been renamed by a live-range split somewhere, so uses have
    /// to consult the per-block rename maps.
    pub renamed: bool,
    /// Id of the temporary this one should share a register with, or 0.
    pub affinity: u32,
}

impl Assignment {
    pub fn new(reg: PhysReg, rc: RegClass) -> Self {
        Assignment {
            reg,
            rc,
            assigned: true,
            ..Assignment::default()
        }
    }

    pub fn set(&mut self, def: &Definition) {
        self.assigned = true;
        self.reg = def.phys_reg();
        self.rc = def.reg_class();
    }
}

/// A group of values that would ideally occupy consecutive registers,
/// such as the operands of a `p_create_vector`.
#[derive(Clone, Debug, Default)]
pub struct VectorInfo {
    /// Give up on the group as soon as one member can't be placed
    /// relative to the others. Used where failing costs no copies.
    pub is_weak: bool,
    pub parts: SmallVec<[Operand; 4]>,
}

impl VectorInfo {
    pub fn new(parts: &[Operand], is_weak: bool) -> Self {
        VectorInfo {
            is_weak,
            parts: parts.iter().copied().collect(),
        }
    }
}

define_index!(VectorIdx, VectorStore, VectorInfo);

/// Pending moves of one parallel copy. Definitions without a temporary
/// are copies the rename engine has not processed yet.
pub type CopyVec = Vec<(Operand, Definition)>;

/// Which operands of the current instruction a batch of copies may
/// rename.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UpdateRenames(u8);

impl UpdateRenames {
    pub const NONE: UpdateRenames = UpdateRenames(0);
    /// Also rename operands that stay live after the instruction.
    pub const NOT_KILLED_OPS: UpdateRenames = UpdateRenames(1 << 0);
    /// Rename fixed operands, but only if the copy lands on their
    /// fixed register.
    pub const PRECOLORED_OPS: UpdateRenames = UpdateRenames(1 << 2);

    #[inline(always)]
    pub fn contains(self, other: UpdateRenames) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }
}

impl std::ops::BitOr for UpdateRenames {
    type Output = UpdateRenames;
    fn bitor(self, rhs: UpdateRenames) -> UpdateRenames {
        UpdateRenames(self.0 | rhs.0)
    }
}

/// One value handed to the compacting relocation. A variable without
/// id reserves space whose position is reported back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelocVar {
    pub id: Option<u32>,
    pub rc: RegClass,
}

impl RelocVar {
    pub fn temp(id: u32, rc: RegClass) -> Self {
        RelocVar { id: Some(id), rc }
    }

    pub fn space(rc: RegClass) -> Self {
        RelocVar { id: None, rc }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_renames_flags() {
        let flags = UpdateRenames::NOT_KILLED_OPS | UpdateRenames::PRECOLORED_OPS;
        assert!(flags.contains(UpdateRenames::NOT_KILLED_OPS));
        assert!(flags.contains(UpdateRenames::PRECOLORED_OPS));
        assert!(!UpdateRenames::NONE.contains(UpdateRenames::NOT_KILLED_OPS));
        assert!(!flags.contains(UpdateRenames::NONE));
    }

    #[test]
    fn vector_parts_are_copied() {
        let parts = [
            Operand::undef(RegClass::V1),
            Operand::undef(RegClass::V2B),
            Operand::undef(RegClass::V2),
        ];
        let vec = VectorInfo::new(&parts, true);
        assert!(vec.is_weak);
        assert_eq!(vec.parts.len(), 3);
        assert_eq!(vec.parts[1].reg_class(), RegClass::V2B);
    }
}
