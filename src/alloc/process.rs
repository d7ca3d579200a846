/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Main allocation loop that processes blocks and instructions in
//! program order.

use super::data_structures::{CopyVec, UpdateRenames};
use super::Env;
use crate::info::{add_subdword_definition, add_subdword_operand, operand_can_use_reg};
use crate::ir::{BlockKind, Definition, GfxLevel, Instruction, Opcode, Operand};
use crate::regfile::{PhysRegInterval, RegisterFile};
use crate::target::op_fixed_to_def;
use crate::{Block, PhysReg, RegAllocError, RegClass, RegType, Temp};
use smallvec::SmallVec;

impl<'a> Env<'a> {
    fn out_of_registers(&self, temp: Temp) -> RegAllocError {
        RegAllocError::OutOfRegisters {
            temp,
            block: self.block,
        }
    }

    /// Moves operands that have to be read from a specific register
    /// there, evicting whatever lives in those registers.
    fn handle_fixed_operands(
        &mut self,
        reg_file: &mut RegisterFile,
        parallelcopies: &mut CopyVec,
        instr: &mut Instruction,
    ) -> Result<(), RegAllocError> {
        debug_assert!(parallelcopies.is_empty());
        let mut tmp_file = reg_file.clone();
        let mut moved: SmallVec<[usize; 4]> = SmallVec::new();

        for (i, op) in instr.operands.iter().enumerate() {
            if !op.is_temp() || !op.is_fixed() {
                continue;
            }
            let src = self.assignments[op.temp_id() as usize].reg;
            self.adjust_max_used_regs(op.reg_class(), op.phys_reg());

            if op.phys_reg() == src {
                tmp_file.block(op.phys_reg(), op.reg_class());
                continue;
            }
            debug_assert!(parallelcopies
                .iter()
                .all(|(_, def)| def.phys_reg() != op.phys_reg()));

            // Not a blocking variable for the other fixed operands.
            tmp_file.clear(src, op.reg_class());
            moved.push(i);
            let pc_op = Operand::fixed(op.get_temp(), src);
            parallelcopies.push((pc_op, Definition::physical(op.phys_reg(), op.reg_class())));
        }

        if moved.is_empty() {
            return Ok(());
        }

        let mut blocking_vars = Vec::new();
        for &i in &moved {
            let op = instr.operands[i];
            let target = PhysRegInterval::new(op.phys_reg(), op.size());
            blocking_vars.extend(self.collect_vars(&mut tmp_file, target));
            tmp_file.block(op.phys_reg(), op.reg_class());
        }

        let no_def = PhysRegInterval::new(PhysReg::default(), 0);
        if !self.get_regs_for_copies(&mut tmp_file, parallelcopies, &blocking_vars, instr, no_def) {
            return Err(self.out_of_registers(instr.operands[moved[0]].get_temp()));
        }
        self.update_renames(
            reg_file,
            parallelcopies,
            instr,
            UpdateRenames::NOT_KILLED_OPS | UpdateRenames::PRECOLORED_OPS,
        );
        Ok(())
    }

    /// Copies operand `idx` into a register this instruction can read
    /// it from.
    fn get_reg_for_operand(
        &mut self,
        reg_file: &mut RegisterFile,
        parallelcopies: &mut CopyVec,
        instr: &mut Instruction,
        idx: usize,
    ) -> Result<(), RegAllocError> {
        let op = instr.operands[idx];
        // It may only be a stride mismatch, so the current register is
        // a candidate too.
        let src = self.assignments[op.temp_id() as usize].reg;
        reg_file.clear(src, op.reg_class());
        let dst = self.get_reg(reg_file, op.get_temp(), parallelcopies, instr, Some(idx))?;

        let pc_op = Operand::fixed(op.get_temp(), src);
        parallelcopies.push((pc_op, Definition::physical(dst, op.reg_class())));
        self.update_renames(reg_file, parallelcopies, instr, UpdateRenames::NOT_KILLED_OPS);
        reg_file.fill(&Definition::fixed(instr.operands[idx].get_temp(), dst));
        Ok(())
    }

    /// The register file at the end of a merge block's predecessors is
    /// the one after this block's phis, so their branches get their
    /// scratch definition placed as if it were a phi.
    fn place_branch_definitions(
        &mut self,
        reg_file: &mut RegisterFile,
        instructions: &mut Vec<Instruction>,
    ) -> Result<(), RegAllocError> {
        let preds = self.program.block(self.block).linear_preds.clone();
        let Some(&first) = preds.first() else {
            return Ok(());
        };
        if preds.len() == 1 && self.program.block(first).linear_succs.len() != 1 {
            return Ok(());
        }

        let mut dummy = self.phi_dummy.clone();
        let br_reg = self.get_reg_phi(reg_file, instructions, &mut dummy, Temp::new(0, RegClass::S2))?;
        let scc_live = reg_file.is_occupied(PhysReg::SCC);
        for pred in preds {
            let pred_block = self.program.block_mut(pred);
            pred_block.scc_live_out = scc_live;
            if let Some(def) = pred_block
                .instructions
                .last_mut()
                .filter(|br| br.is_branch())
                .and_then(|br| br.definitions.first_mut())
            {
                def.set_fixed(br_reg);
            }
        }
        Ok(())
    }

    /// Assigns operands and definitions of one non-phi instruction and
    /// appends it, preceded by any copies it needs, to `instructions`.
    fn process_instruction(
        &mut self,
        reg_file: &mut RegisterFile,
        mut instr: Instruction,
        instructions: &mut Vec<Instruction>,
    ) -> Result<(), RegAllocError> {
        let mut parallelcopies = CopyVec::new();
        let temp_in_scc = reg_file.is_occupied(PhysReg::SCC);

        // Operands.
        let mut fixed = false;
        for op in instr.operands.iter_mut() {
            if !op.is_temp() {
                continue;
            }
            op.set_temp(self.read_variable(op.get_temp(), self.block));
            let var = self.assignments[op.temp_id() as usize];
            debug_assert!(var.assigned, "{:?} used before it was defined", op.get_temp());
            fixed |= op.is_fixed() && var.reg != op.phys_reg();
        }

        // Before GFX10, v_writelane can read two sgprs only if one of
        // them is m0.
        let is_writelane = matches!(instr.opcode, Opcode::VWritelaneB32 | Opcode::VWritelaneB32E64);
        if self.gfx_level <= GfxLevel::Gfx9
            && is_writelane
            && instr.operands[0].is_temp()
            && instr.operands[1].is_temp()
        {
            let in_m0 = |id: u32| self.assignments[id as usize].reg == PhysReg::M0;
            if !in_m0(instr.operands[0].temp_id()) && !in_m0(instr.operands[1].temp_id()) {
                instr.operands[0].set_fixed(PhysReg::M0);
                fixed = true;
            }
        }

        if fixed {
            self.handle_fixed_operands(reg_file, &mut parallelcopies, &mut instr)?;
        }

        for i in 0..instr.operands.len() {
            let op = instr.operands[i];
            if !op.is_temp() || op.is_fixed() {
                continue;
            }
            let reg = self.assignments[op.temp_id() as usize].reg;
            if operand_can_use_reg(self.gfx_level, &instr, i, reg, op.reg_class()) {
                instr.operands[i].set_fixed(reg);
            } else {
                self.get_reg_for_operand(reg_file, &mut parallelcopies, &mut instr, i)?;
            }

            if instr.is_exp()
                || (instr.is_vmem() && i == 3 && self.gfx_level == GfxLevel::Gfx6)
                || (instr.is_ds() && instr.gds)
            {
                let op = instr.operands[i];
                self.war_hint.insert_range(op.phys_reg(), op.size());
            }
        }

        // Values dying here are free for the definitions.
        for op in &instr.operands {
            if op.is_temp() && op.is_first_kill_before_def() {
                reg_file.clear_operand(op);
            }
        }

        self.optimize_encoding(reg_file, &mut instr);

        // The definition shares the register of its accumulator operand.
        if let Some(idx) = op_fixed_to_def(&instr) {
            let reg = instr.operands[idx].phys_reg();
            instr.definitions[0].set_fixed(reg);
        }

        // Fixed definitions first.
        for i in 0..instr.definitions.len() {
            let def = instr.definitions[i];
            if !def.is_fixed() {
                continue;
            }
            self.adjust_max_used_regs(def.reg_class(), def.phys_reg());

            if reg_file.test(def.phys_reg(), def.bytes()) {
                let def_regs = PhysRegInterval::new(def.phys_reg(), def.size());
                let vars = self.collect_vars(reg_file, def_regs);

                // Don't move the blocking values onto dying operands.
                let mut tmp_file = reg_file.clone();
                tmp_file.fill_killed_operands(&instr);
                if !self.get_regs_for_copies(&mut tmp_file, &mut parallelcopies, &vars, &instr, def_regs)
                {
                    return Err(self.out_of_registers(def.get_temp()));
                }
                self.update_renames(reg_file, &mut parallelcopies, &mut instr, UpdateRenames::NONE);
            }

            let def = instr.definitions[i];
            if !def.is_temp() {
                continue;
            }
            self.assignments[def.temp_id() as usize].set(&def);
            reg_file.fill(&def);
        }

        // Then everything else.
        for i in 0..instr.definitions.len() {
            let def = instr.definitions[i];
            if def.is_fixed() || !def.is_temp() {
                continue;
            }
            let rc = def.reg_class();

            match instr.opcode {
                Opcode::PStartLinearVgpr => {
                    let reg = self.alloc_linear_vgpr(reg_file, &instr, &mut parallelcopies)?;
                    instr.definitions[i].set_fixed(reg);
                    self.update_renames(
                        reg_file,
                        &mut parallelcopies,
                        &mut instr,
                        UpdateRenames::NOT_KILLED_OPS,
                    );
                }
                Opcode::PSplitVector => {
                    let offset: u32 = instr.definitions[..i].iter().map(|d| d.bytes()).sum();
                    let reg = instr.operands[0].phys_reg().advance(offset as i32);
                    if self.get_reg_specified(reg_file, rc, &instr, reg, None) {
                        instr.definitions[i].set_fixed(reg);
                    } else if i == 0 {
                        // Somewhere the whole vector would fit.
                        let vec_rc = RegClass::get(rc.reg_type(), instr.operands[0].bytes());
                        let info = self.copy_info(vec_rc);
                        if let Some(reg) = self.get_reg_simple(reg_file, info) {
                            if self.get_reg_specified(reg_file, rc, &instr, reg, None) {
                                instr.definitions[i].set_fixed(reg);
                            }
                        }
                    } else if instr.definitions[i - 1].is_fixed() {
                        let prev = instr.definitions[i - 1];
                        let reg = prev.phys_reg().advance(prev.bytes() as i32);
                        if self.get_reg_specified(reg_file, rc, &instr, reg, None) {
                            instr.definitions[i].set_fixed(reg);
                        }
                    }
                }
                Opcode::PParallelcopy => {
                    let op = instr.operands[i];
                    if op.is_temp()
                        && op.get_temp().reg_type() == def.get_temp().reg_type()
                        && !reg_file.test(op.phys_reg(), def.bytes())
                    {
                        instr.definitions[i].set_fixed(op.phys_reg());
                    }
                }
                Opcode::PExtractVector => {
                    let offset = def.bytes() * instr.operands[1].constant_value();
                    let reg = instr.operands[0].phys_reg().advance(offset as i32);
                    if self.get_reg_specified(reg_file, rc, &instr, reg, None) {
                        instr.definitions[i].set_fixed(reg);
                    }
                }
                Opcode::PCreateVector => {
                    let reg = self.get_reg_create_vector(
                        reg_file,
                        def.get_temp(),
                        &mut parallelcopies,
                        &instr,
                    )?;
                    self.update_renames(reg_file, &mut parallelcopies, &mut instr, UpdateRenames::NONE);
                    instr.definitions[i].set_fixed(reg);
                }
                _ => {}
            }

            if !instr.definitions[i].is_fixed() {
                let reg = self.get_reg(reg_file, def.get_temp(), &mut parallelcopies, &instr, None)?;
                instr.definitions[i].set_fixed(reg);
                if rc.is_subdword() && def.bytes() < 4 && (reg.byte() != 0 || reg_file.test(reg, 4)) {
                    let allow_16bit_write = reg.byte() % 2 == 0 && !reg_file.test(reg, 2);
                    add_subdword_definition(self.gfx_level, &mut instr, reg, allow_16bit_write);
                }
                let flags = if instr.opcode != Opcode::PCreateVector {
                    UpdateRenames::NOT_KILLED_OPS
                } else {
                    UpdateRenames::NONE
                };
                self.update_renames(reg_file, &mut parallelcopies, &mut instr, flags);
            }

            let def = instr.definitions[i];
            debug_assert!(def.is_fixed());
            debug_assert_eq!(def.phys_reg().reg_type(), def.get_temp().reg_type());
            self.assignments[def.temp_id() as usize].set(&def);
            reg_file.fill(&def);
        }

        self.handle_pseudo(reg_file, &mut instr);

        // Dead definitions and late-killed operands, and sub-dword
        // operands at a non-zero byte need a re-encoding.
        for def in &instr.definitions {
            if def.is_temp() && def.is_kill() {
                reg_file.clear_definition(def);
            }
        }
        for i in 0..instr.operands.len() {
            let op = instr.operands[i];
            if !op.is_temp() {
                continue;
            }
            if op.is_first_kill() && op.is_late_kill() {
                reg_file.clear_operand(&op);
            }
            if op.phys_reg().byte() != 0 {
                add_subdword_operand(self.gfx_level, &mut instr, i, op.phys_reg().byte(), op.reg_class());
            }
        }

        self.emit_parallel_copy(&mut parallelcopies, &instr, instructions, temp_in_scc, reg_file);
        self.fix_vcc_encoding(&mut instr, instructions);

        trace!("    {}", instr);
        instructions.push(instr);
        Ok(())
    }

    /// Resets the linear vgpr region at the end of the program, or
    /// shrinks it before control flow that needs the space.
    fn finish_block(&mut self, reg_file: &mut RegisterFile, instructions: &mut Vec<Instruction>) {
        let block = self.program.block(self.block);
        if block.kind.contains(BlockKind::TOP_LEVEL) && block.linear_succs.is_empty() {
            self.budget.num_linear_vgprs = 0;
            return;
        }
        if !self.should_compact_linear_vgprs(reg_file) {
            return;
        }

        // The copies go in front of the branch.
        let Some(mut br) = instructions.pop() else {
            return;
        };
        let temp_in_scc = reg_file.is_occupied(PhysReg::SCC)
            || br.operands.first().map_or(false, |op| op.phys_reg() == PhysReg::SCC);

        let mut parallelcopies = CopyVec::new();
        self.compact_linear_vgprs(reg_file, &mut parallelcopies);
        self.update_renames(reg_file, &mut parallelcopies, &mut br, UpdateRenames::NOT_KILLED_OPS);
        self.emit_parallel_copy(&mut parallelcopies, &br, instructions, temp_in_scc, reg_file);
        instructions.push(br);
    }

    /// Allocates every block in program order.
    pub(crate) fn allocate_blocks(&mut self) -> Result<(), RegAllocError> {
        for index in 0..self.program.blocks.len() {
            let block = Block::new(index);
            self.block = block;
            trace!("block{}", index);

            let mut reg_file = self.init_reg_file(block)?;
            self.war_hint.clear();
            self.rr_vgpr_it = PhysReg::vgpr(0);
            self.rr_sgpr_it = PhysReg::sgpr(0);

            let mut phis = std::mem::take(&mut self.program.block_mut(block).instructions);
            let num_phis = phis.iter().take_while(|instr| instr.is_phi()).count();
            let body = phis.split_off(num_phis);

            let mut instructions = Vec::with_capacity(phis.len() + body.len());
            // Phis are incomplete here: only their definitions get a
            // register, the operands were renamed when the register file
            // was set up.
            self.get_regs_for_phis(&mut reg_file, phis, &mut instructions)?;
            self.place_branch_definitions(&mut reg_file, &mut instructions)?;

            for instr in body {
                self.stats.instructions += 1;
                // Unconditional branches are handled with the phis of
                // their target.
                if instr.opcode == Opcode::PBranch {
                    instructions.push(instr);
                    break;
                }
                debug_assert!(!instr.is_phi());
                self.process_instruction(&mut reg_file, instr, &mut instructions)?;
            }

            self.finish_block(&mut reg_file, &mut instructions);
            self.program.block_mut(block).instructions = instructions;
            self.stats.blocks += 1;
        }

        debug_assert!(self
            .assignments
            .iter()
            .all(|a| !a.assigned || (a.rc.reg_type() == RegType::Vgpr) == (a.reg.reg() >= 256)));
        Ok(())
    }
}
