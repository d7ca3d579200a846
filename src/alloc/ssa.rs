/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Keeping the program in SSA form across live-range splits.
//!
//! A value moved by a parallel copy gets a new name in the block where
//! the copy happens. Successor blocks look the name up in their
//! predecessors' rename maps and insert a phi when the predecessors
//! disagree. Loops are the awkward case: the back edge is only known
//! once the whole loop body is allocated, so the header is patched up
//! when the loop exit is reached.

use super::Env;
use crate::ir::{BlockKind, Definition, Instruction, Opcode, Operand};
use crate::regfile::RegisterFile;
use crate::{Block, BlockRange, FxHashMap, RegAllocError, Temp};
use smallvec::SmallVec;

impl<'a> Env<'a> {
    /// The name `val` has at the end of `block`.
    pub(crate) fn read_variable(&self, val: Temp, block: Block) -> Temp {
        if !self.assignments[val.id() as usize].renamed {
            return val;
        }
        self.renames[block.index()]
            .get(&val.id())
            .copied()
            .unwrap_or(val)
    }

    /// The name of live-in `val` on entry to `block`, inserting a phi at
    /// the top of `block` if its predecessors disagree.
    pub(crate) fn handle_live_in(&mut self, val: Temp, block: Block) -> Temp {
        if !self.assignments[val.id() as usize].renamed {
            return val;
        }

        let preds: SmallVec<[Block; 2]> = self
            .program
            .block(block)
            .preds_for(val.reg_class())
            .iter()
            .copied()
            .collect();
        match preds.len() {
            0 => return val,
            1 => return self.read_variable(val, preds[0]),
            _ => {}
        }

        let ops: SmallVec<[Temp; 4]> = preds
            .iter()
            .map(|&pred| self.read_variable(val, pred))
            .collect();
        if ops.iter().all(|&op| op == ops[0]) {
            return ops[0];
        }

        debug_assert!(!val.reg_class().is_linear_vgpr());
        let opcode = if val.is_linear() {
            Opcode::PLinearPhi
        } else {
            Opcode::PPhi
        };
        let new_val = self.allocate_unassigned_temp(val.reg_class());
        let operands: SmallVec<[Operand; 4]> = ops
            .iter()
            .map(|&op| {
                let assignment = &self.assignments[op.id() as usize];
                debug_assert!(assignment.assigned);
                Operand::fixed(op, assignment.reg)
            })
            .collect();
        let phi = Instruction::new(opcode, &operands, &[Definition::new(new_val)]);
        trace!("  repair phi {} in block{}", phi, block.index());
        self.program.block_mut(block).instructions.insert(0, phi);
        self.stats.phis_inserted += 1;
        new_val
    }

    /// Once a loop is allocated: inserts header phis for values renamed
    /// inside the loop and propagates the new names through the body.
    pub(crate) fn handle_loop_phis(&mut self, body: BlockRange) {
        let header = body.first();
        let live_in: Vec<u32> = self.program.live_in[header.index()].iter().copied().collect();
        let preheader = header.prev();
        let mut renames: FxHashMap<u32, Temp> = FxHashMap::default();

        for t in live_in {
            if !self.assignments[t as usize].renamed {
                continue;
            }
            let val = Temp::new(t, self.program.temp_rc[t as usize]);
            let prev = self.read_variable(val, preheader);
            let renamed = self.handle_live_in(val, header);
            if renamed == prev {
                continue;
            }

            // Extra renames at the end of each body block, unless the
            // block already renamed the value itself.
            renames.insert(prev.id(), renamed);
            self.orig_names.insert(renamed.id(), val);
            for block in body.iter() {
                let entry = self.renames[block.index()].entry(val.id()).or_insert(renamed);
                if *entry == prev {
                    *entry = renamed;
                }
            }

            // The phi just inserted reads `prev` on the back edges too.
            let var = self.assignments[prev.id() as usize];
            self.assignments[renamed.id() as usize] = var;
            let phi = &mut self.program.block_mut(header).instructions[0];
            for op in phi.operands.iter_mut().skip(1) {
                if op.is_temp() && op.get_temp() == prev {
                    op.set_temp(renamed);
                }
            }
            phi.definitions[0].set_fixed(var.reg);
        }

        // Back-edge operands of the header's original phis.
        let num_new_phis = renames.len();
        let num_instrs = self.program.block(header).instructions.len();
        for i in num_new_phis..num_instrs {
            let header_block = self.program.block(header);
            if !header_block.instructions[i].is_phi() {
                break;
            }
            let preds: SmallVec<[Block; 2]> = header_block
                .phi_preds(&header_block.instructions[i])
                .iter()
                .copied()
                .collect();
            let num_ops = header_block.instructions[i].operands.len();
            for j in 1..num_ops {
                let op = self.program.block(header).instructions[i].operands[j];
                if !op.is_temp() {
                    continue;
                }
                // The operand may already carry a rename from an earlier
                // phi insertion.
                let orig = self
                    .orig_names
                    .get(&op.temp_id())
                    .copied()
                    .unwrap_or_else(|| op.get_temp());
                let name = self.read_variable(orig, preds[j]);
                let reg = self.assignments[name.id() as usize].reg;
                let op = &mut self.program.block_mut(header).instructions[i].operands[j];
                op.set_temp(name);
                op.set_fixed(reg);
            }
        }

        if renames.is_empty() {
            return;
        }

        for block in body.iter() {
            let is_header = block == header;
            for instr in self.program.block_mut(block).instructions.iter_mut() {
                // Header phis are renamed after allocation.
                if is_header && instr.is_phi() {
                    continue;
                }
                for op in instr.operands.iter_mut() {
                    if !op.is_temp() {
                        continue;
                    }
                    if let Some(&renamed) = renames.get(&op.temp_id()) {
                        op.set_temp(renamed);
                    }
                }
            }
        }
    }

    /// The register file on entry to `block`: every live-in value at its
    /// current register, with phi operands renamed and SSA repaired.
    pub(crate) fn init_reg_file(&mut self, block: Block) -> Result<RegisterFile, RegAllocError> {
        let kind = self.program.block(block).kind;
        if kind.contains(BlockKind::LOOP_EXIT) {
            let header = self
                .loop_header
                .pop()
                .ok_or(RegAllocError::InvalidProgram("loop exit outside of a loop"))?;
            self.handle_loop_phis(BlockRange::new(header, block));
        }

        let mut reg_file = RegisterFile::new();
        let live_in: Vec<u32> = self.program.live_in[block.index()].iter().copied().collect();
        if block.index() == 0 && !live_in.is_empty() {
            return Err(RegAllocError::InvalidProgram("values live into the entry block"));
        }

        if kind.contains(BlockKind::LOOP_HEADER) {
            self.loop_header.push(block);
            let preheader = block.prev();

            // Only the incoming value is known so far.
            let num_instrs = self.program.block(block).instructions.len();
            for i in 0..num_instrs {
                if !self.program.block(block).instructions[i].is_phi() {
                    break;
                }
                let op = self.program.block(block).instructions[i].operands[0];
                if op.is_temp() {
                    let name = self.read_variable(op.get_temp(), preheader);
                    let reg = self.assignments[name.id() as usize].reg;
                    let op = &mut self.program.block_mut(block).instructions[i].operands[0];
                    op.set_temp(name);
                    op.set_fixed(reg);
                }
            }

            for t in live_in {
                let val = Temp::new(t, self.program.temp_rc[t as usize]);
                let renamed = self.read_variable(val, preheader);
                if renamed != val {
                    self.add_rename(val, renamed);
                }
                let var = self.assignments[renamed.id() as usize];
                debug_assert!(var.assigned);
                reg_file.fill(&Definition::fixed(renamed, var.reg));
            }
        } else {
            let num_instrs = self.program.block(block).instructions.len();
            for i in 0..num_instrs {
                let bb = self.program.block(block);
                if !bb.instructions[i].is_phi() {
                    break;
                }
                let preds: SmallVec<[Block; 2]> =
                    bb.phi_preds(&bb.instructions[i]).iter().copied().collect();
                for (j, &pred) in preds.iter().enumerate() {
                    let op = self.program.block(block).instructions[i].operands[j];
                    if !op.is_temp() {
                        continue;
                    }
                    let name = self.read_variable(op.get_temp(), pred);
                    let reg = self.assignments[name.id() as usize].reg;
                    let op = &mut self.program.block_mut(block).instructions[i].operands[j];
                    op.set_temp(name);
                    op.set_fixed(reg);
                }
            }

            for t in live_in {
                let val = Temp::new(t, self.program.temp_rc[t as usize]);
                let renamed = self.handle_live_in(val, block);
                let var = self.assignments[renamed.id() as usize];
                // After a split the live-in may be a phi now, which gets
                // its register later.
                if var.assigned {
                    reg_file.fill(&Definition::fixed(renamed, var.reg));
                }
                if renamed != val {
                    self.add_rename(val, renamed);
                }
            }
        }

        Ok(reg_file)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::env_for_test;
    use crate::ir::{BlockKind, Opcode, Program, RegisterDemand};
    use crate::{Block, PhysReg, RegClass, Temp};

    /// A diamond: block0 branches to block1 and block2, which join in
    /// block3. Temp 1 is live through all of it.
    fn diamond() -> Program {
        let mut program = Program::new(crate::ir::GfxLevel::Gfx10_3);
        program.max_reg_demand = RegisterDemand::new(8, 8);
        let b0 = program.add_block(BlockKind::TOP_LEVEL | BlockKind::BRANCH);
        let b1 = program.add_block(BlockKind::NONE);
        let b2 = program.add_block(BlockKind::NONE);
        let b3 = program.add_block(BlockKind::TOP_LEVEL | BlockKind::MERGE);
        program.add_edge(b0, b1);
        program.add_edge(b0, b2);
        program.add_edge(b1, b3);
        program.add_edge(b2, b3);
        program.allocate_tmp(RegClass::V1);
        for b in [b1, b2, b3] {
            program.live_in[b.index()].insert(1);
        }
        program
    }

    #[test]
    fn unrenamed_values_keep_their_name() {
        let mut program = diamond();
        let mut env = env_for_test(&mut program);
        let a = Temp::new(1, RegClass::V1);
        env.assignments[1].set(&crate::ir::Definition::fixed(a, PhysReg::vgpr(0)));
        assert_eq!(env.read_variable(a, Block::new(1)), a);
        assert_eq!(env.handle_live_in(a, Block::new(3)), a);
        assert!(env.program.blocks[3].instructions.is_empty());
    }

    #[test]
    fn single_predecessor_reads_its_name() {
        let mut program = diamond();
        let mut env = env_for_test(&mut program);
        let a = Temp::new(1, RegClass::V1);
        env.assignments[1].set(&crate::ir::Definition::fixed(a, PhysReg::vgpr(0)));
        env.block = Block::new(0);
        let b = env.allocate_temp(PhysReg::vgpr(4), RegClass::V1);
        env.add_rename(a, b);
        assert_eq!(env.handle_live_in(a, Block::new(1)), b);
    }

    #[test]
    fn disagreeing_predecessors_get_a_phi() {
        let mut program = diamond();
        let mut env = env_for_test(&mut program);
        let a = Temp::new(1, RegClass::V1);
        env.assignments[1].set(&crate::ir::Definition::fixed(a, PhysReg::vgpr(0)));
        env.block = Block::new(1);
        let b = env.allocate_temp(PhysReg::vgpr(4), RegClass::V1);
        env.add_rename(a, b);

        env.block = Block::new(3);
        let reg_file = env.init_reg_file(Block::new(3)).unwrap();
        let phi = &env.program.blocks[3].instructions[0];
        assert_eq!(phi.opcode, Opcode::PPhi);
        assert_eq!(phi.operands[0].get_temp(), b);
        assert_eq!(phi.operands[0].phys_reg(), PhysReg::vgpr(4));
        assert_eq!(phi.operands[1].get_temp(), a);
        assert_eq!(phi.operands[1].phys_reg(), PhysReg::vgpr(0));

        // The phi has no register yet, so nothing is live in the file.
        let new = phi.definitions[0].get_temp();
        assert!(!reg_file.is_occupied(PhysReg::vgpr(0)));
        assert!(!reg_file.is_occupied(PhysReg::vgpr(4)));
        assert_eq!(env.renames[3].get(&1), Some(&new));
        assert_eq!(env.stats.phis_inserted, 1);
    }

    #[test]
    fn loop_exit_without_header_is_rejected() {
        let mut program = Program::new(crate::ir::GfxLevel::Gfx10_3);
        program.add_block(BlockKind::TOP_LEVEL);
        program.add_block(BlockKind::LOOP_EXIT);
        let mut env = env_for_test(&mut program);
        assert!(env.init_reg_file(Block::new(1)).is_err());
    }
}
