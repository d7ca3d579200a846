/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Turning planned moves into renamed values and parallel copies.
//!
//! Every value a parallel copy moves gets a fresh temporary at its new
//! location. Later uses in the same block find the new name through the
//! block's rename map; uses in other blocks go through the SSA repair in
//! `ssa.rs`.

use super::bitset::RegSet;
use super::data_structures::{CopyVec, UpdateRenames};
use super::Env;
use crate::ir::{Instruction, Opcode};
use crate::regfile::RegisterFile;
use crate::{PhysReg, RegClass, RegType, Temp};

impl<'a> Env<'a> {
    /// Records that `orig` is called `new` from here on in the current
    /// block.
    pub(crate) fn add_rename(&mut self, orig: Temp, new: Temp) {
        self.renames[self.block.index()].insert(orig.id(), new);
        self.orig_names.insert(new.id(), orig);
        self.assignments[orig.id() as usize].renamed = true;
    }

    /// Gives the destination of every new copy in `parallelcopies` a
    /// fresh name and updates the register file and `instr` to match.
    ///
    /// A copy of one of `instr`'s own definitions just moves that
    /// definition, and a copy of an earlier copy's destination moves the
    /// destination instead; neither needs a new name. Operands of
    /// `instr` that read a moved value are renamed when `flags` allow
    /// it.
    pub(crate) fn update_renames(
        &mut self,
        reg_file: &mut RegisterFile,
        parallelcopies: &mut CopyVec,
        instr: &mut Instruction,
        flags: UpdateRenames,
    ) {
        // Copies whose destination has a temp were handled earlier.
        for (op, def) in parallelcopies.iter() {
            if !def.is_temp() {
                reg_file.clear_operand(op);
            }
        }

        let mut i = 0;
        while i < parallelcopies.len() {
            let (copy_op, copy_def) = parallelcopies[i];
            if copy_def.is_temp() {
                i += 1;
                continue;
            }
            let dst = copy_def.phys_reg();

            // A moved definition.
            if let Some(def) = instr
                .definitions
                .iter_mut()
                .find(|def| def.is_temp() && def.get_temp() == copy_op.get_temp())
            {
                def.set_fixed(dst);
                reg_file.fill(def);
                self.assignments[def.temp_id() as usize].reg = dst;
                parallelcopies.remove(i);
                continue;
            }

            // A moved copy destination.
            if let Some(j) = parallelcopies
                .iter()
                .position(|(_, other)| other.is_temp() && other.get_temp() == copy_op.get_temp())
            {
                parallelcopies[j].1.set_fixed(dst);
                let other = parallelcopies[j].1;
                self.assignments[other.temp_id() as usize].reg = dst;
                parallelcopies.remove(i);

                let mut fill = true;
                for op in instr.operands.iter_mut() {
                    if op.is_temp() && op.temp_id() == other.temp_id() {
                        op.set_fixed(dst);
                        fill = !op.is_kill_before_def();
                    }
                }
                if fill {
                    reg_file.fill(&other);
                }
                continue;
            }

            let new_temp = self.allocate_temp(dst, copy_def.reg_class());
            parallelcopies[i].1.set_temp(new_temp);
            let copy_def = parallelcopies[i].1;
            self.stats.live_range_splits += 1;

            // Operands reading the moved value.
            let mut first = [true, true];
            let mut fill = true;
            for op in instr.operands.iter_mut() {
                if !op.is_temp() || op.temp_id() != copy_op.temp_id() {
                    continue;
                }
                let mut omit_renaming = flags.contains(UpdateRenames::PRECOLORED_OPS)
                    && op.is_fixed()
                    && op.phys_reg() != dst;
                if !flags.contains(UpdateRenames::NOT_KILLED_OPS) && !op.is_kill_before_def() {
                    // The old register stays readable if no copy
                    // overwrites it.
                    let src = copy_op.phys_reg();
                    omit_renaming = parallelcopies.iter().all(|(_, pc_def)| {
                        let def_reg = pc_def.phys_reg();
                        if def_reg > src {
                            src.reg() + copy_op.size() <= def_reg.reg()
                        } else {
                            def_reg.reg() + pc_def.size() <= src.reg()
                        }
                    });
                }

                let kill = omit_renaming || op.is_kill();
                if first[omit_renaming as usize] {
                    op.set_first_kill(kill);
                } else {
                    op.set_kill(kill);
                }
                first[omit_renaming as usize] = false;

                if omit_renaming {
                    continue;
                }
                op.set_temp(copy_def.get_temp());
                op.set_fixed(dst);
                fill = !op.is_kill_before_def() || flags.contains(UpdateRenames::PRECOLORED_OPS);
            }

            if fill {
                reg_file.fill(&copy_def);
            }
            i += 1;
        }
    }

    /// Asks for a scratch sgpr if lowering `instr` needs one because
    /// `scc` is live across it.
    pub(crate) fn handle_pseudo(&mut self, reg_file: &RegisterFile, instr: &mut Instruction) {
        if !instr.is_pseudo() {
            return;
        }
        match instr.opcode {
            Opcode::PExtractVector
            | Opcode::PCreateVector
            | Opcode::PSplitVector
            | Opcode::PParallelcopy
            | Opcode::PStartLinearVgpr => {}
            _ => return,
        }

        // Lowering only touches scc when moving linear values.
        let writes_linear = instr
            .definitions
            .iter()
            .any(|def| def.reg_class().is_linear());
        let reads_linear = instr
            .operands
            .iter()
            .any(|op| op.is_temp() && op.reg_class().is_linear());
        if !writes_linear || !reads_linear || !reg_file.is_occupied(PhysReg::SCC) {
            return;
        }

        instr.pseudo.needs_scratch_reg = true;
        instr.pseudo.tmp_in_scc = true;

        let mut reg = (0..=self.max_used_sgpr)
            .rev()
            .map(|r| PhysReg::sgpr(r as u32))
            .find(|&reg| !reg_file.is_occupied(reg));
        if reg.is_none() {
            reg = (self.max_used_sgpr + 1..self.program.max_reg_demand.sgpr)
                .map(|r| PhysReg::sgpr(r as u32))
                .find(|&reg| !reg_file.is_occupied(reg));
        }
        let reg = reg.unwrap_or(PhysReg::sgpr(self.program.max_reg_demand.sgpr as u32));

        self.adjust_max_used_regs(RegClass::S1, reg);
        instr.pseudo.scratch_sgpr = reg;
        trace!("    scratch sgpr {} for {}", reg, instr.opcode);
    }

    fn emit_parallel_copy_internal(
        &mut self,
        parallelcopies: &mut CopyVec,
        instr: &Instruction,
        instructions: &mut Vec<Instruction>,
        temp_in_scc: bool,
        reg_file: &RegisterFile,
    ) {
        if parallelcopies.is_empty() {
            return;
        }

        let mut linear_vgpr = false;
        let mut sgpr_operands_alias_defs = false;
        let mut sgpr_operands = RegSet::new();
        for (op, def) in parallelcopies.iter() {
            linear_vgpr |= op.reg_class().is_linear_vgpr();

            if temp_in_scc
                && !sgpr_operands_alias_defs
                && op.is_temp()
                && op.get_temp().reg_type() == RegType::Sgpr
            {
                sgpr_operands.insert_range(op.phys_reg(), op.size());
                let dst = def.phys_reg();
                sgpr_operands_alias_defs =
                    (0..def.size()).any(|i| sgpr_operands.contains(dst.plus_slots(i)));
            }

            debug_assert_eq!(op.size(), def.size());
            // The operand may already be a renamed value.
            let orig = self
                .orig_names
                .get(&op.temp_id())
                .copied()
                .unwrap_or_else(|| op.get_temp());
            self.add_rename(orig, def.get_temp());
        }

        let ops: Vec<_> = parallelcopies.iter().map(|(op, _)| *op).collect();
        let defs: Vec<_> = parallelcopies.iter().map(|(_, def)| *def).collect();
        let mut pc = Instruction::new(Opcode::PParallelcopy, &ops, &defs);

        if temp_in_scc && (sgpr_operands_alias_defs || linear_vgpr) {
            // The state in front of `instr`: its results are not written
            // yet and its dying operands are still there.
            let mut tmp_file = reg_file.clone();
            for def in &instr.definitions {
                if def.is_temp() && !def.is_kill() {
                    tmp_file.clear_definition(def);
                }
            }
            for op in &instr.operands {
                if op.is_temp() && op.is_first_kill() {
                    tmp_file.block(op.phys_reg(), op.reg_class());
                }
            }
            self.handle_pseudo(&tmp_file, &mut pc);
        } else {
            pc.pseudo.needs_scratch_reg = sgpr_operands_alias_defs || linear_vgpr;
            pc.pseudo.tmp_in_scc = false;
        }

        trace!("    {}", pc);
        self.stats.parallelcopies += 1;
        self.stats.copies += parallelcopies.len();
        instructions.push(pc);
        parallelcopies.clear();
    }

    /// Emits the pending moves in front of `instr`. Moves of linear
    /// vgprs go into their own copy, first: they never land on space
    /// of a normal vgpr.
    pub(crate) fn emit_parallel_copy(
        &mut self,
        parallelcopies: &mut CopyVec,
        instr: &Instruction,
        instructions: &mut Vec<Instruction>,
        temp_in_scc: bool,
        reg_file: &RegisterFile,
    ) {
        if parallelcopies.is_empty() {
            return;
        }

        let mut linear_vgpr = CopyVec::new();
        if self.budget.num_linear_vgprs != 0 {
            let (linear, normal): (CopyVec, CopyVec) = parallelcopies
                .drain(..)
                .partition(|(op, _)| op.reg_class().is_linear_vgpr());
            linear_vgpr = linear;
            *parallelcopies = normal;
        }

        self.emit_parallel_copy_internal(&mut linear_vgpr, instr, instructions, temp_in_scc, reg_file);
        self.emit_parallel_copy_internal(parallelcopies, instr, instructions, temp_in_scc, reg_file);
    }
}
