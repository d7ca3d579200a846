/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Registers for phi definitions.
//!
//! Phis are placed before anything else in their block. When the
//! register file at block entry leaves no good spot, live-in values are
//! moved away; the move is expressed as a new phi in this block, so
//! that the copies end up in the predecessors.

use super::data_structures::{CopyVec, UpdateRenames};
use super::Env;
use crate::ir::{Instruction, Opcode, Operand};
use crate::regfile::RegisterFile;
use crate::{PhysReg, RegAllocError, Temp};
use smallvec::SmallVec;

impl<'a> Env<'a> {
    /// Finds a register for `temp`, defined by `phi` at the top of the
    /// current block. Moved phis get their new register; moved live-in
    /// values turn into new phis appended to `instructions`.
    pub(crate) fn get_reg_phi(
        &mut self,
        reg_file: &mut RegisterFile,
        instructions: &mut Vec<Instruction>,
        phi: &mut Instruction,
        temp: Temp,
    ) -> Result<PhysReg, RegAllocError> {
        let mut parallelcopy = CopyVec::new();
        let reg = self.get_reg(reg_file, temp, &mut parallelcopy, phi, None)?;
        self.update_renames(reg_file, &mut parallelcopy, phi, UpdateRenames::NOT_KILLED_OPS);

        for (op, def) in parallelcopy {
            // Another phi of this block: just give it the new register.
            if let Some(prev_phi) = instructions
                .iter_mut()
                .rev()
                .find(|instr| instr.definitions.first().map(|d| d.temp_id()) == Some(op.temp_id()))
            {
                let prev_def = &mut prev_phi.definitions[0];
                prev_def.set_fixed(def.phys_reg());
                reg_file.fill(prev_def);
                self.assignments[prev_def.temp_id() as usize] =
                    super::Assignment::new(def.phys_reg(), def.reg_class());
                continue;
            }

            let orig = self
                .orig_names
                .get(&op.temp_id())
                .copied()
                .unwrap_or_else(|| op.get_temp());
            self.add_rename(orig, def.get_temp());

            // A live-in value: move it in the predecessors.
            let opcode = if op.get_temp().is_linear() {
                Opcode::PLinearPhi
            } else {
                Opcode::PPhi
            };
            let num_preds = self.program.block(self.block).preds_for(op.reg_class()).len();
            let operands: SmallVec<[Operand; 4]> = std::iter::repeat(op).take(num_preds).collect();
            let new_phi = Instruction::new(opcode, &operands, &[def]);
            trace!("    live-in moved by {}", new_phi);
            instructions.push(new_phi);
            self.stats.phis_inserted += 1;

            // A loop header would otherwise get a second phi for it
            // once the loop is done.
            self.program.live_in[self.block.index()].remove(&orig.id());
        }

        Ok(reg)
    }

    /// Places the definitions of the block's live phis, which are moved
    /// from `phis` to `instructions`.
    pub(crate) fn get_regs_for_phis(
        &mut self,
        reg_file: &mut RegisterFile,
        phis: Vec<Instruction>,
        instructions: &mut Vec<Instruction>,
    ) -> Result<(), RegAllocError> {
        instructions.extend(phis.into_iter().filter(|phi| !phi.definitions[0].is_kill()));

        // All operands agree on a register.
        for phi in instructions.iter_mut() {
            let def = phi.definitions[0];
            if def.is_fixed() || !phi.operands[0].is_temp() {
                continue;
            }
            let reg = phi.operands[0].phys_reg();
            let all_same = phi.operands[1..]
                .iter()
                .all(|op| op.is_temp() && (!op.is_fixed() || op.phys_reg() == reg));
            if !all_same || !self.get_reg_specified(reg_file, def.reg_class(), phi, reg, None) {
                continue;
            }
            self.fix_phi(reg_file, phi, reg);
        }

        // At least one operand's register, or the affinity.
        for phi in instructions.iter_mut() {
            let def = phi.definitions[0];
            if def.is_fixed() {
                continue;
            }
            if let Some(affinity) = self.assigned_affinity(def.temp_id()) {
                debug_assert_eq!(affinity.rc, def.reg_class());
                if self.get_reg_specified(reg_file, def.reg_class(), phi, affinity.reg, None) {
                    self.fix_phi(reg_file, phi, affinity.reg);
                    continue;
                }
            }

            // Later operands first: that avoids copies in else-blocks.
            let phi_ref: &Instruction = phi;
            let candidate = phi_ref
                .operands
                .iter()
                .rev()
                .filter(|op| op.is_temp() && op.is_fixed())
                .map(|op| op.phys_reg())
                .find(|&reg| self.get_reg_specified(reg_file, def.reg_class(), phi_ref, reg, None));
            if let Some(reg) = candidate {
                self.fix_phi(reg_file, phi, reg);
            }
        }

        // Whatever is left. `get_reg_phi` may append phis as it goes.
        let mut i = 0;
        while i < instructions.len() {
            if instructions[i].definitions[0].is_fixed() {
                i += 1;
                continue;
            }
            let mut phi = instructions[i].clone();
            let temp = phi.definitions[0].get_temp();
            let reg = self.get_reg_phi(reg_file, instructions, &mut phi, temp)?;
            self.fix_phi(reg_file, &mut phi, reg);
            instructions[i] = phi;
            i += 1;
        }
        Ok(())
    }

    fn fix_phi(&mut self, reg_file: &mut RegisterFile, phi: &mut Instruction, reg: PhysReg) {
        let def = &mut phi.definitions[0];
        def.set_fixed(reg);
        reg_file.fill(def);
        self.assignments[def.temp_id() as usize].set(def);
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{env_for_test, fill};
    use crate::ir::{
        BlockKind, Definition, GfxLevel, Instruction, Opcode, Operand, Program, RegisterDemand,
    };
    use crate::regfile::RegisterFile;
    use crate::{Block, PhysReg, RegClass, Temp};

    fn merge_program() -> Program {
        let mut program = Program::new(GfxLevel::Gfx10_3);
        program.max_reg_demand = RegisterDemand::new(4, 8);
        let b0 = program.add_block(BlockKind::TOP_LEVEL);
        let b1 = program.add_block(BlockKind::NONE);
        let b2 = program.add_block(BlockKind::TOP_LEVEL | BlockKind::MERGE);
        program.add_edge(b0, b1);
        program.add_edge(b0, b2);
        program.add_edge(b1, b2);
        for _ in 0..8 {
            program.allocate_tmp(RegClass::V1);
        }
        program
    }

    fn phi(def: u32, ops: &[(u32, u32)]) -> Instruction {
        let ops: Vec<Operand> = ops
            .iter()
            .map(|&(id, reg)| Operand::fixed(Temp::new(id, RegClass::V1), PhysReg::vgpr(reg)))
            .collect();
        Instruction::new(
            Opcode::PPhi,
            &ops,
            &[Definition::new(Temp::new(def, RegClass::V1))],
        )
    }

    #[test]
    fn matching_operands_decide() {
        let mut program = merge_program();
        let mut env = env_for_test(&mut program);
        env.block = Block::new(2);
        let mut reg_file = RegisterFile::new();
        let mut instructions = Vec::new();
        env.get_regs_for_phis(&mut reg_file, vec![phi(3, &[(1, 2), (2, 2)])], &mut instructions)
            .unwrap();
        assert_eq!(instructions[0].definitions[0].phys_reg(), PhysReg::vgpr(2));
        assert!(env.assignments[3].assigned);
        assert!(reg_file.is_occupied(PhysReg::vgpr(2)));
    }

    #[test]
    fn later_operand_preferred() {
        let mut program = merge_program();
        let mut env = env_for_test(&mut program);
        env.block = Block::new(2);
        let mut reg_file = RegisterFile::new();
        let mut instructions = Vec::new();
        env.get_regs_for_phis(&mut reg_file, vec![phi(3, &[(1, 0), (2, 1)])], &mut instructions)
            .unwrap();
        assert_eq!(instructions[0].definitions[0].phys_reg(), PhysReg::vgpr(1));
    }

    #[test]
    fn dead_phis_are_dropped() {
        let mut program = merge_program();
        let mut env = env_for_test(&mut program);
        env.block = Block::new(2);
        let mut dead = phi(3, &[(1, 0), (2, 0)]);
        dead.definitions[0].set_kill(true);
        let mut reg_file = RegisterFile::new();
        let mut instructions = Vec::new();
        env.get_regs_for_phis(&mut reg_file, vec![dead], &mut instructions)
            .unwrap();
        assert!(instructions.is_empty());
    }

    #[test]
    fn blocked_registers_move_live_ins_through_new_phis() {
        let mut program = merge_program();
        let mut env = env_for_test(&mut program);
        env.block = Block::new(2);
        env.policy.skip_optimistic_path = true;
        let mut reg_file = RegisterFile::new();
        // v1 and v3 are free, but the pair needs two adjacent registers.
        fill(&mut env, &mut reg_file, 4, RegClass::V1, PhysReg::vgpr(0));
        fill(&mut env, &mut reg_file, 5, RegClass::V1, PhysReg::vgpr(2));
        env.program.live_in[2].extend([4, 5]);

        let pair = Instruction::new(
            Opcode::PPhi,
            &[
                Operand::fixed(Temp::new(1, RegClass::V2), PhysReg::vgpr(0)),
                Operand::fixed(Temp::new(2, RegClass::V2), PhysReg::vgpr(2)),
            ],
            &[Definition::new(Temp::new(3, RegClass::V2))],
        );
        let mut instructions = Vec::new();
        env.get_regs_for_phis(&mut reg_file, vec![pair], &mut instructions)
            .unwrap();

        assert_eq!(instructions.len(), 2);
        let def = instructions[0].definitions[0];
        assert!(def.is_fixed());
        let moved = &instructions[1];
        assert_eq!(moved.opcode, Opcode::PPhi);
        assert_eq!(moved.operands.len(), 2);
        assert_eq!(moved.operands[0], moved.operands[1]);
        let new_reg = moved.definitions[0].phys_reg();
        assert!(new_reg.reg() < def.phys_reg().reg() || new_reg.reg() >= def.phys_reg().reg() + 2);
        let orig = env.orig_names[&moved.definitions[0].temp_id()];
        assert!(!env.program.live_in[2].contains(&orig.id()));
        assert_eq!(env.stats.phis_inserted, 1);
    }
}
