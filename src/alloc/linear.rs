/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Compacting relocation and the linear vgpr region.
//!
//! Linear vgprs live at the top of the vgpr budget and are never split,
//! since their live ranges cross the inside of divergent control flow.
//! The region grows downwards into the normal vgprs when a
//! `p_start_linear_vgpr` needs room and is compacted at top-level block
//! boundaries when the following control flow needs the space.

use super::data_structures::{CopyVec, RelocVar};
use super::Env;
use crate::ir::{BlockKind, Definition, Instruction, Operand};
use crate::regfile::{PhysRegInterval, RegisterFile};
use crate::{PhysReg, RegAllocError, RegType, Temp};

/// Where a compacting relocation put things.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Relocation {
    /// Position of the reserved space, if one was requested.
    pub space: PhysReg,
    /// One past the last relocated byte.
    pub end: PhysReg,
}

impl<'a> Env<'a> {
    /// Lays `vars` out back to back from `start`, strictest alignment
    /// first, and records a copy for every variable that moves.
    pub(crate) fn compact_relocate_vars(
        &mut self,
        vars: &[RelocVar],
        parallelcopies: &mut CopyVec,
        start: PhysReg,
    ) -> Relocation {
        let mut sorted: Vec<(RelocVar, u32)> = vars
            .iter()
            .map(|var| {
                let info = self.copy_info(var.rc);
                let stride = if info.rc.is_subdword() {
                    info.stride
                } else {
                    info.stride * 4
                };
                (RelocVar { id: var.id, rc: info.rc }, stride)
            })
            .collect();

        // Stable, and the reserved space goes first among equals.
        sorted.sort_by(|(a, a_stride), (b, b_stride)| {
            b_stride.cmp(a_stride).then_with(|| match (a.id, b.id) {
                (None, None) => std::cmp::Ordering::Equal,
                (None, Some(_)) => std::cmp::Ordering::Less,
                (Some(_), None) => std::cmp::Ordering::Greater,
                (Some(a), Some(b)) => self.assignments[a as usize]
                    .reg
                    .cmp(&self.assignments[b as usize].reg),
            })
        });

        let file_end = match start.reg_type() {
            RegType::Sgpr => PhysReg::new(256),
            RegType::Vgpr => PhysReg::END,
        };
        let mut next_reg = start;
        let mut space = PhysReg::default();
        for (var, stride) in sorted {
            let align = stride.max(4);
            next_reg = PhysReg::from_bytes(next_reg.reg_b().next_multiple_of(align));

            match var.id {
                Some(id) => {
                    let assignment = self.assignments[id as usize];
                    if next_reg != assignment.reg {
                        let pc_op = Operand::fixed(Temp::new(id, assignment.rc), assignment.reg);
                        parallelcopies.push((pc_op, Definition::physical(next_reg, assignment.rc)));
                    }
                }
                None => space = next_reg,
            }

            let after = next_reg.plus_slots(var.rc.size());
            if after <= file_end {
                self.adjust_max_used_regs(var.rc, next_reg);
            }
            next_reg = after;
        }

        Relocation {
            space,
            end: next_reg,
        }
    }

    /// Moves the linear vgprs to the top of their region and shrinks it
    /// to fit. Returns false if the region was already tight.
    pub(crate) fn compact_linear_vgprs(
        &mut self,
        reg_file: &RegisterFile,
        parallelcopies: &mut CopyVec,
    ) -> bool {
        let linear_bounds = self.budget.bounds(RegType::Vgpr, true);
        let zeros = reg_file.count_zero(linear_bounds);
        if zeros == 0 {
            return false;
        }

        let vars: Vec<RelocVar> = reg_file
            .find_vars(linear_bounds)
            .into_iter()
            .map(|id| RelocVar::temp(id, self.assignments[id as usize].rc))
            .collect();

        self.budget.num_linear_vgprs -= zeros as u16;
        let start = self.budget.bounds(RegType::Vgpr, true).lo();
        self.compact_relocate_vars(&vars, parallelcopies, start);
        self.stats.linear_compactions += 1;
        trace!(
            "    compacted linear vgprs to {} slots",
            self.budget.num_linear_vgprs
        );
        true
    }

    /// Places the definition of a `p_start_linear_vgpr`, growing the
    /// linear region into the normal vgprs if it has no free space.
    pub(crate) fn alloc_linear_vgpr(
        &mut self,
        reg_file: &RegisterFile,
        instr: &Instruction,
        parallelcopies: &mut CopyVec,
    ) -> Result<PhysReg, RegAllocError> {
        let def = instr.definitions[0];
        let rc = def.reg_class();
        debug_assert!(def.bytes() % 4 == 0);
        let out_of_regs = RegAllocError::OutOfRegisters {
            temp: def.get_temp(),
            block: self.block,
        };

        // An unused space inside the current region.
        let vgpr_bounds = self.budget.vgpr_bounds as u32;
        for i in rc.size()..=self.budget.num_linear_vgprs as u32 {
            let reg = PhysReg::vgpr(vgpr_bounds - i);
            if !reg_file.test(reg, rc.bytes()) {
                self.adjust_max_used_regs(rc, reg);
                return Ok(reg);
            }
        }

        let old_normal_bounds = self.budget.bounds(RegType::Vgpr, false);

        self.compact_linear_vgprs(reg_file, parallelcopies);

        let needed = self.budget.num_linear_vgprs as u32 + rc.size();
        if needed > vgpr_bounds {
            return Err(out_of_regs);
        }
        let reg = PhysReg::vgpr(vgpr_bounds - needed);
        // Space that belonged to normal vgprs until now.
        let new_win = PhysRegInterval::from_until(reg, old_normal_bounds.hi().max(reg));
        let reg_win = PhysRegInterval::new(reg, rc.size());

        let mut tmp_file = reg_file.clone();
        let blocking_vars = self.collect_vars(&mut tmp_file, new_win);
        for op in &instr.operands {
            if op.is_temp() && op.is_first_kill_before_def() {
                tmp_file.fill_operand(op);
            }
        }

        let mut pc = CopyVec::new();
        if !self.policy.skip_optimistic_path
            && self.get_regs_for_copies(&mut tmp_file, &mut pc, &blocking_vars, instr, reg_win)
        {
            parallelcopies.extend(pc);
        } else {
            // Re-pack all normal vgprs below the grown region, and move
            // the dying operands into the definition.
            let vars: Vec<RelocVar> = reg_file
                .find_vars(old_normal_bounds)
                .into_iter()
                .map(|id| RelocVar::temp(id, self.assignments[id as usize].rc))
                .collect();
            let packed = self.compact_relocate_vars(&vars, parallelcopies, PhysReg::vgpr(0));
            if packed.end > reg {
                return Err(out_of_regs);
            }

            let killed_ops: Vec<RelocVar> = instr
                .operands
                .iter()
                .filter(|op| {
                    op.is_temp()
                        && op.is_first_kill_before_def()
                        && op.reg_class().reg_type() == RegType::Vgpr
                })
                .map(|op| RelocVar::temp(op.temp_id(), op.reg_class()))
                .collect();
            self.compact_relocate_vars(&killed_ops, parallelcopies, reg_win.lo());
            self.stats.repacks += 1;
        }

        // Only now, so that a dying operand could be placed inside the
        // definition.
        self.budget.num_linear_vgprs += rc.size() as u16;

        self.adjust_max_used_regs(rc, reg);
        Ok(reg)
    }

    /// Whether the linear vgprs should be compacted before leaving the
    /// current top-level block, because the control flow that follows
    /// needs more normal vgprs than are left.
    pub(crate) fn should_compact_linear_vgprs(&self, reg_file: &RegisterFile) -> bool {
        let block = self.program.block(self.block);
        if !block.kind.contains(BlockKind::TOP_LEVEL) || block.linear_succs.is_empty() {
            return false;
        }

        let blocks = &self.program.blocks;
        let mut max_vgpr_usage: u32 = 0;
        let mut next_toplevel = self.block.index() + 1;
        while next_toplevel < blocks.len()
            && !blocks[next_toplevel].kind.contains(BlockKind::TOP_LEVEL)
        {
            max_vgpr_usage = max_vgpr_usage.max(blocks[next_toplevel].register_demand.vgpr as u32);
            next_toplevel += 1;
        }
        if let Some(next) = blocks.get(next_toplevel) {
            max_vgpr_usage = max_vgpr_usage.max(next.live_in_demand.vgpr as u32);
        }

        for id in reg_file.find_vars(self.budget.bounds(RegType::Vgpr, true)) {
            max_vgpr_usage = max_vgpr_usage.saturating_sub(self.assignments[id as usize].rc.size());
        }

        max_vgpr_usage > self.budget.bounds(RegType::Vgpr, false).size
    }
}

#[cfg(test)]
mod tests {
    use super::super::data_structures::{CopyVec, RelocVar};
    use super::super::tests::{env_for_test, fill};
    use crate::ir::{BlockKind, Definition, GfxLevel, Instruction, Opcode, Program, RegisterDemand};
    use crate::regfile::RegisterFile;
    use crate::{PhysReg, RegClass, RegType, Temp};

    fn program(vgprs: u16, sgprs: u16) -> Program {
        let mut program = Program::new(GfxLevel::Gfx10_3);
        program.add_block(BlockKind::TOP_LEVEL);
        program.max_reg_demand = RegisterDemand::new(vgprs, sgprs);
        program
    }

    #[test]
    fn relocation_sorts_by_stride_then_register() {
        let mut program = program(8, 32);
        let mut env = env_for_test(&mut program);
        let mut reg_file = RegisterFile::new();
        fill(&mut env, &mut reg_file, 1, RegClass::S1, PhysReg::sgpr(9));
        fill(&mut env, &mut reg_file, 2, RegClass::S2, PhysReg::sgpr(12));
        fill(&mut env, &mut reg_file, 3, RegClass::S1, PhysReg::sgpr(0));
        let vars = [
            RelocVar::temp(1, RegClass::S1),
            RelocVar::temp(2, RegClass::S2),
            RelocVar::temp(3, RegClass::S1),
            RelocVar::space(RegClass::S1),
        ];
        let mut pcs = CopyVec::new();
        let reloc = env.compact_relocate_vars(&vars, &mut pcs, PhysReg::sgpr(0));
        // s[0:1] for the pair, then the space, then %3 and %1.
        assert_eq!(reloc.space, PhysReg::sgpr(2));
        assert_eq!(reloc.end, PhysReg::sgpr(5));
        let moved: Vec<(u32, PhysReg)> = pcs
            .iter()
            .map(|(op, def)| (op.temp_id(), def.phys_reg()))
            .collect();
        assert_eq!(
            moved,
            vec![
                (2, PhysReg::sgpr(0)),
                (3, PhysReg::sgpr(3)),
                (1, PhysReg::sgpr(4)),
            ]
        );
    }

    #[test]
    fn linear_vgpr_reuses_free_space_in_region() {
        let mut program = program(8, 16);
        let mut env = env_for_test(&mut program);
        env.budget.num_linear_vgprs = 2;
        let mut reg_file = RegisterFile::new();
        fill(&mut env, &mut reg_file, 1, RegClass::V1_LINEAR, PhysReg::vgpr(7));
        let def = Definition::new(Temp::new(2, RegClass::V1_LINEAR));
        let instr = Instruction::new(Opcode::PStartLinearVgpr, &[], &[def]);
        let mut pcs = CopyVec::new();
        let reg = env.alloc_linear_vgpr(&reg_file, &instr, &mut pcs).unwrap();
        assert_eq!(reg, PhysReg::vgpr(6));
        assert!(pcs.is_empty());
        assert_eq!(env.budget.num_linear_vgprs, 2);
    }

    #[test]
    fn linear_vgpr_grows_region_and_moves_normal_values() {
        let mut program = program(4, 16);
        let mut env = env_for_test(&mut program);
        let mut reg_file = RegisterFile::new();
        fill(&mut env, &mut reg_file, 1, RegClass::V1, PhysReg::vgpr(3));
        let def = Definition::new(Temp::new(2, RegClass::V1_LINEAR));
        let instr = Instruction::new(Opcode::PStartLinearVgpr, &[], &[def]);
        let mut pcs = CopyVec::new();
        let reg = env.alloc_linear_vgpr(&reg_file, &instr, &mut pcs).unwrap();
        assert_eq!(reg, PhysReg::vgpr(3));
        assert_eq!(env.budget.num_linear_vgprs, 1);
        assert_eq!(pcs.len(), 1);
        let (op, dst) = pcs[0];
        assert_eq!(op.temp_id(), 1);
        assert!(dst.phys_reg() < PhysReg::vgpr(3));
        // The normal and linear regions don't overlap.
        let normal = env.budget.bounds(RegType::Vgpr, false);
        let linear = env.budget.bounds(RegType::Vgpr, true);
        assert!(!normal.intersects(&linear));
    }

    #[test]
    fn compaction_closes_gaps() {
        let mut program = program(8, 16);
        let mut env = env_for_test(&mut program);
        env.budget.num_linear_vgprs = 3;
        let mut reg_file = RegisterFile::new();
        fill(&mut env, &mut reg_file, 1, RegClass::V1_LINEAR, PhysReg::vgpr(5));
        let mut pcs = CopyVec::new();
        assert!(env.compact_linear_vgprs(&reg_file, &mut pcs));
        assert_eq!(env.budget.num_linear_vgprs, 1);
        assert_eq!(pcs.len(), 1);
        assert_eq!(pcs[0].1.phys_reg(), PhysReg::vgpr(7));

        reg_file.clear(PhysReg::vgpr(5), RegClass::V1_LINEAR);
        fill(&mut env, &mut reg_file, 1, RegClass::V1_LINEAR, PhysReg::vgpr(7));
        let mut pcs = CopyVec::new();
        assert!(!env.compact_linear_vgprs(&reg_file, &mut pcs));
        assert!(pcs.is_empty());
    }

    #[test]
    fn compaction_needed_before_divergent_code() {
        let mut program = program(8, 16);
        let body = program.add_block(BlockKind::NONE);
        let merge = program.add_block(BlockKind::TOP_LEVEL);
        program.add_edge(crate::Block::new(0), body);
        program.add_edge(body, merge);
        program.blocks[1].register_demand = RegisterDemand::new(7, 0);
        let mut env = env_for_test(&mut program);
        env.budget.num_linear_vgprs = 2;
        let mut reg_file = RegisterFile::new();
        fill(&mut env, &mut reg_file, 1, RegClass::V1_LINEAR, PhysReg::vgpr(7));
        // Six normal slots, the body needs seven minus one linear value.
        assert!(!env.should_compact_linear_vgprs(&reg_file));
        env.program.blocks[1].register_demand = RegisterDemand::new(8, 0);
        assert!(env.should_compact_linear_vgprs(&reg_file));
    }
}
