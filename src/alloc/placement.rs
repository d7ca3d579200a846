/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Choosing a register for one value: hints first, then the searches,
//! then budget growth, and finally a re-pack of the whole file.

use super::data_structures::{CopyVec, RelocVar, VectorIdx};
use super::Env;
use crate::info::get_stride;
use crate::ir::{BlockKind, Instruction, Opcode, RegisterDemand};
use crate::regfile::{PhysRegInterval, RegisterFile, Slot};
use crate::target::update_vgpr_sgpr_demand;
use crate::{PhysReg, RegAllocError, RegClass, RegType, Temp};

impl<'a> Env<'a> {
    /// Grows the budget of `rc`'s file by one register, if the wave
    /// count allows it.
    pub(crate) fn increase_register_file(&mut self, rc: RegClass) -> bool {
        let demand = self.program.max_reg_demand;
        match rc.reg_type() {
            RegType::Vgpr
                if self.budget.num_linear_vgprs == 0
                    && self.budget.vgpr_bounds < self.vgpr_limit =>
            {
                update_vgpr_sgpr_demand(
                    self.program,
                    RegisterDemand::new(self.budget.vgpr_bounds + 1, demand.sgpr),
                );
                self.budget.vgpr_bounds = self.program.max_reg_demand.vgpr;
            }
            RegType::Sgpr if demand.sgpr < self.sgpr_limit => {
                update_vgpr_sgpr_demand(
                    self.program,
                    RegisterDemand::new(demand.vgpr, self.budget.sgpr_bounds + 1),
                );
                self.budget.sgpr_bounds = self.program.max_reg_demand.sgpr;
            }
            _ => return false,
        }
        self.stats.budget_growths += 1;
        trace!(
            "    budget grown to v{} s{} ({} waves)",
            self.budget.vgpr_bounds,
            self.budget.sgpr_bounds,
            self.program.num_waves
        );
        true
    }

    /// Whether the already placed members of a vector group still sit
    /// at their relative offsets, with room for the rest.
    pub(crate) fn is_vector_intact(&self, reg_file: &RegisterFile, vec: VectorIdx) -> bool {
        let parts = &self.vector_store[vec].parts;
        let size: u32 = parts.iter().map(|op| op.bytes()).sum();

        let mut first: Option<PhysReg> = None;
        let mut offset: u32 = 0;
        for op in parts {
            let assignment = &self.assignments[op.temp_id() as usize];
            if assignment.assigned {
                match first {
                    None => {
                        let bounds = self.budget.bounds(RegType::Vgpr, false);
                        let start = assignment.reg.advance(-(offset as i32));
                        let vec_win = PhysRegInterval::new(start, (size + 3) / 4);
                        if start.reg() >= 512 || !bounds.contains(&vec_win) {
                            return false;
                        }
                        first = Some(start);
                    }
                    Some(start) => {
                        if assignment.reg != start.advance(offset as i32) {
                            return false;
                        }
                    }
                }
            } else if let Some(start) = first {
                // Something else sits where this part should go.
                if reg_file.test(start.advance(offset as i32), op.bytes()) {
                    return false;
                }
            }
            offset += op.bytes();
        }
        true
    }

    /// Places `temp` relative to the other members of its vector group,
    /// or where the whole group would fit.
    pub(crate) fn get_reg_vector(
        &mut self,
        reg_file: &RegisterFile,
        temp: Temp,
        instr: &Instruction,
        operand: Option<usize>,
    ) -> Option<PhysReg> {
        let vec = *self.vectors.get(&temp.id())?;
        let is_weak = self.vector_store[vec].is_weak;
        if is_weak && !self.is_vector_intact(reg_file, vec) {
            return None;
        }
        let parts = self.vector_store[vec].parts.clone();

        let our_offset: u32 = parts
            .iter()
            .take_while(|op| !(op.is_temp() && op.temp_id() == temp.id()))
            .map(|op| op.bytes())
            .sum();

        let mut their_offset: u32 = 0;
        for op in &parts {
            if op.is_temp()
                && op.temp_id() != temp.id()
                && op.get_temp().reg_type() == temp.reg_type()
                && self.assignments[op.temp_id() as usize].assigned
            {
                let reg = self.assignments[op.temp_id() as usize]
                    .reg
                    .advance(our_offset as i32 - their_offset as i32);
                if self.get_reg_specified(reg_file, temp.reg_class(), instr, reg, operand) {
                    return Some(reg);
                }
                // Image address components have to stay aligned as a
                // whole or not at all.
                if is_weak {
                    return None;
                }
            }
            their_offset += op.bytes();
        }

        // Nothing placed yet: look for space for the whole vector.
        let vec_rc = RegClass::get(temp.reg_type(), their_offset);
        let info = self.copy_info(vec_rc);
        let reg = self.get_reg_simple(reg_file, info)?.advance(our_offset as i32);
        self.get_reg_specified(reg_file, temp.reg_class(), instr, reg, operand)
            .then_some(reg)
    }

    /// Finds a register for `temp`, written by `instr` (or read by
    /// operand `operand` of it), recording any moves this requires.
    pub(crate) fn get_reg(
        &mut self,
        reg_file: &RegisterFile,
        temp: Temp,
        parallelcopies: &mut CopyVec,
        instr: &Instruction,
        operand: Option<usize>,
    ) -> Result<PhysReg, RegAllocError> {
        let rc = temp.reg_class();

        // Pieces of a split whose own affinities are known.
        if let Some(defs) = self.split_vectors.get(&temp.id()).cloned() {
            let mut offset: u32 = 0;
            for def in &defs {
                if let Some(affinity) = self.assigned_affinity(def.temp_id()) {
                    let reg = affinity.reg.advance(-(offset as i32));
                    if self.get_reg_specified(reg_file, rc, instr, reg, operand) {
                        return Ok(reg);
                    }
                }
                offset += def.bytes();
            }
        }

        let assignment = self.assignments[temp.id() as usize];
        if let Some(affinity) = self.assigned_affinity(temp.id()) {
            if self.get_reg_specified(reg_file, rc, instr, affinity.reg, operand) {
                return Ok(affinity.reg);
            }
        }
        if assignment.vcc && self.get_reg_specified(reg_file, rc, instr, PhysReg::VCC, operand) {
            return Ok(PhysReg::VCC);
        }
        if assignment.m0 && self.get_reg_specified(reg_file, rc, instr, PhysReg::M0, operand) {
            return Ok(PhysReg::M0);
        }

        if self.vectors.contains_key(&temp.id()) {
            if let Some(reg) = self.get_reg_vector(reg_file, temp, instr, operand) {
                return Ok(reg);
            }
        }

        // Reuse the register of a dying operand.
        if temp.size() == 1 && operand.is_none() {
            for op in &instr.operands {
                // Back-edge operands of loop header phis are not placed
                // yet.
                if op.is_temp() && op.is_first_kill_before_def() && op.reg_class() == rc {
                    if !op.is_fixed() {
                        continue;
                    }
                    let reg = op.phys_reg();
                    if reg == PhysReg::VCC || reg == PhysReg::VCC_HI {
                        continue;
                    }
                    if self.get_reg_specified(reg_file, rc, instr, reg, operand) {
                        return Ok(reg);
                    }
                }
            }
        }

        let info = self.def_info(instr, rc, operand);

        if !self.policy.skip_optimistic_path {
            if let Some(reg) = self.get_reg_simple(reg_file, info) {
                return Ok(reg);
            }
        }

        if let Some(reg) = self.get_reg_impl(reg_file, parallelcopies, &info, instr) {
            return Ok(reg);
        }

        // Shrinking the linear region may be enough.
        let mut pc = CopyVec::new();
        if info.rc.reg_type() == RegType::Vgpr
            && self.program.block(self.block).kind.contains(BlockKind::TOP_LEVEL)
            && self.compact_linear_vgprs(reg_file, &mut pc)
        {
            // The linear region is only read through the copies, so
            // their destinations don't need to be filled in.
            let mut tmp_file = reg_file.clone();
            for (op, _) in &pc {
                tmp_file.clear_operand(op);
            }
            parallelcopies.extend(pc);
            return self.get_reg(&tmp_file, temp, parallelcopies, instr, operand);
        }

        if self.increase_register_file(info.rc) {
            return self.get_reg(reg_file, temp, parallelcopies, instr, operand);
        }

        self.repack(reg_file, temp, parallelcopies, instr, info.rc)
    }

    /// Terminal fallback: moves every value of the file to the bottom,
    /// leaving one hole big enough for both the dying operands and the
    /// definitions of `instr`.
    fn repack(
        &mut self,
        reg_file: &RegisterFile,
        temp: Temp,
        parallelcopies: &mut CopyVec,
        instr: &Instruction,
        rc: RegClass,
    ) -> Result<PhysReg, RegAllocError> {
        let ty = rc.reg_type();
        let is_assigned_def = |env: &Env, id: u32| {
            instr
                .definitions
                .iter()
                .any(|def| def.is_temp() && def.temp_id() == id && env.assignments[id as usize].assigned)
        };

        let mut def_size = rc.size();
        for def in &instr.definitions {
            if self.assignments[def.temp_id() as usize].assigned && def.reg_class().reg_type() == ty {
                def_size += def.size();
            }
        }
        let killed_op_size: u32 = instr
            .operands
            .iter()
            .filter(|op| {
                op.is_temp() && op.is_first_kill_before_def() && op.reg_class().reg_type() == ty
            })
            .map(|op| op.size())
            .sum();

        let regs = self.budget.bounds_for(rc);

        // Everything that lives through the instruction.
        let mut vars: Vec<RelocVar> = reg_file
            .find_vars(regs)
            .into_iter()
            .filter(|&id| !is_assigned_def(self, id))
            .map(|id| RelocVar::temp(id, self.assignments[id as usize].rc))
            .collect();
        vars.push(RelocVar::space(RegClass::new(ty, def_size.max(killed_op_size))));

        let packed = self.compact_relocate_vars(&vars, parallelcopies, regs.lo());
        if packed.end > regs.hi() {
            trace!("    re-pack of {:?} overflows {}", ty, regs);
            return Err(RegAllocError::OutOfRegisters {
                temp,
                block: self.block,
            });
        }

        let killed_ops: Vec<RelocVar> = instr
            .operands
            .iter()
            .filter(|op| {
                op.is_temp() && op.is_first_kill_before_def() && op.reg_class().reg_type() == ty
            })
            .map(|op| RelocVar::temp(op.temp_id(), op.reg_class()))
            .collect();
        self.compact_relocate_vars(&killed_ops, parallelcopies, packed.space);

        let mut def_vars: Vec<RelocVar> = instr
            .definitions
            .iter()
            .filter(|def| {
                self.assignments[def.temp_id() as usize].assigned && def.reg_class().reg_type() == ty
            })
            .map(|def| RelocVar::temp(def.temp_id(), def.reg_class()))
            .collect();
        def_vars.push(RelocVar::space(rc));
        let placed = self.compact_relocate_vars(&def_vars, parallelcopies, packed.space);

        self.stats.repacks += 1;
        trace!("    re-packed {:?} file, {} at {}", ty, temp, placed.space);
        Ok(placed.space)
    }

    /// Places the definition of a `p_create_vector` where the fewest of
    /// its operands have to be copied.
    pub(crate) fn get_reg_create_vector(
        &mut self,
        reg_file: &RegisterFile,
        temp: Temp,
        parallelcopies: &mut CopyVec,
        instr: &Instruction,
    ) -> Result<PhysReg, RegAllocError> {
        let rc = temp.reg_class();
        let size = rc.size();
        let bytes = rc.bytes();
        let stride = get_stride(rc);
        let bounds = self.budget.bounds_for(rc);

        let mut best_pos: Option<PhysReg> = None;
        let mut num_moves: u32 = 0xff;
        let mut best_avoid = true;
        let mut correct_pos_mask: u32 = 0;

        // Try every placement that puts one dying operand in position.
        let mut offset = 0;
        for op in &instr.operands {
            let op_offset = offset;
            offset += op.bytes();
            if !op.is_temp() || !op.is_kill_before_def() || op.get_temp().reg_type() != rc.reg_type() {
                continue;
            }
            let op_reg = op.phys_reg().reg_b();
            if op_offset > op_reg {
                continue;
            }
            let reg_lower = op_reg - op_offset;
            if reg_lower % 4 != 0 {
                continue;
            }
            let reg_win = PhysRegInterval::new(PhysReg::from_bytes(reg_lower), size);

            if Some(reg_win.lo()) == best_pos {
                continue;
            }
            if !bounds.contains(&reg_win) || reg_win.lo().reg() % stride != 0 {
                continue;
            }
            // Don't cut a value in half.
            let lo = reg_win.lo();
            if lo > bounds.lo()
                && !reg_file.slot(lo).is_empty()
                && reg_file.get_id(lo) == reg_file.get_id(lo.advance(-1))
            {
                continue;
            }
            let hi = reg_win.hi();
            if hi < bounds.hi()
                && !reg_file.slot(hi.advance(-4)).is_empty()
                && reg_file.get_id(hi.advance(-1)) == reg_file.get_id(hi)
            {
                continue;
            }

            let mut k: u32 = 0;
            let mut avoid = false;
            let mut linear_vgpr = false;
            for j in reg_win.iter() {
                match reg_file.slot(j) {
                    Slot::Empty => {}
                    Slot::Subdword => {
                        let bytes_left = bytes - (j.reg() - lo.reg()) * 4;
                        for b in 0..bytes_left.min(4) {
                            k += reg_file.test(j.advance(b as i32), 1) as u32;
                        }
                    }
                    Slot::Blocked => k += 4,
                    Slot::Owned(id) => {
                        k += 4;
                        linear_vgpr |= self.assignments[id as usize].rc.is_linear_vgpr();
                    }
                }
                avoid |= self.war_hint.contains(j);
            }

            // Linear vgprs can't be split.
            if linear_vgpr {
                continue;
            }
            if avoid && !best_avoid {
                continue;
            }

            // Operands that are not where they belong need a copy.
            let mut correct_pos_mask_new = 0;
            let mut offset2 = 0;
            for (j, op) in instr.operands.iter().enumerate() {
                if op.is_temp() && op.phys_reg().reg_b() == lo.reg_b() + offset2 {
                    correct_pos_mask_new |= 1 << j;
                } else {
                    k += op.bytes();
                }
                offset2 += op.bytes();
            }
            let aligned = rc == RegClass::V4 && lo.reg() % 4 == 0;
            if k > num_moves || (!aligned && k == num_moves) {
                continue;
            }

            best_pos = Some(lo);
            num_moves = k;
            best_avoid = avoid;
            correct_pos_mask = correct_pos_mask_new;
        }

        let best_pos = match best_pos {
            Some(pos) if num_moves < 2 * bytes => pos,
            _ => return self.get_reg(reg_file, temp, parallelcopies, instr, None),
        };
        if num_moves > bytes {
            let info = self.def_info(instr, rc, None);
            if let Some(reg) = self.get_reg_simple(reg_file, info) {
                return Ok(reg);
            }
        }

        // Dying operands in the wrong place have to move as well.
        let mut tmp_file = reg_file.clone();
        tmp_file.fill_killed_operands(instr);
        for (i, op) in instr.operands.iter().enumerate() {
            if (correct_pos_mask >> i) & 1 != 0 && op.is_kill() {
                tmp_file.clear_operand(op);
            }
        }

        let win = PhysRegInterval::new(best_pos, size);
        let vars = self.collect_vars(&mut tmp_file, win);

        let mut pc = CopyVec::new();
        if !self.get_regs_for_copies(&mut tmp_file, &mut pc, &vars, instr, win) {
            if !self.increase_register_file(rc) {
                return self.get_reg(reg_file, temp, parallelcopies, instr, None);
            }
            return self.get_reg_create_vector(reg_file, temp, parallelcopies, instr);
        }

        parallelcopies.extend(pc);
        self.adjust_max_used_regs(rc, best_pos);
        debug_assert_eq!(instr.opcode, Opcode::PCreateVector);
        Ok(best_pos)
    }
}

#[cfg(test)]
mod tests {
    use super::super::data_structures::{CopyVec, VectorInfo};
    use super::super::tests::{env_for_test, fill};
    use crate::ir::{
        BlockKind, Definition, GfxLevel, Instruction, Opcode, Operand, Program, RegisterDemand,
    };
    use crate::regfile::RegisterFile;
    use crate::target::hard_limit;
    use crate::{PhysReg, RegClass, Temp};

    fn program(vgprs: u16, sgprs: u16) -> Program {
        let mut program = Program::new(GfxLevel::Gfx10_3);
        program.add_block(BlockKind::TOP_LEVEL);
        program.max_reg_demand = RegisterDemand::new(vgprs, sgprs);
        for _ in 0..16 {
            program.allocate_tmp(RegClass::V1);
        }
        program
    }

    fn killed(temp: Temp, reg: PhysReg) -> Operand {
        let mut op = Operand::fixed(temp, reg);
        op.set_first_kill(true);
        op
    }

    #[test]
    fn budget_growth_is_monotonic_and_bounded() {
        let mut program = program(4, 16);
        let limit = hard_limit(&program);
        let mut env = env_for_test(&mut program);
        let mut last = env.budget.vgpr_bounds;
        while env.increase_register_file(RegClass::V1) {
            assert!(env.budget.vgpr_bounds > last);
            assert!(env.budget.vgpr_bounds <= limit.vgpr);
            last = env.budget.vgpr_bounds;
        }
        assert_eq!(env.budget.vgpr_bounds, env.vgpr_limit);
        assert!(env.stats.budget_growths > 0);
    }

    #[test]
    fn affinity_wins_over_first_fit() {
        let mut program = program(8, 16);
        let mut env = env_for_test(&mut program);
        let reg_file = RegisterFile::new();
        fill(&mut env, &mut RegisterFile::new(), 1, RegClass::V1, PhysReg::vgpr(5));
        env.assignments[2].affinity = 1;
        let t = Temp::new(2, RegClass::V1);
        let instr = Instruction::new(Opcode::VMovB32, &[], &[Definition::new(t)]);
        let mut pcs = CopyVec::new();
        let reg = env.get_reg(&reg_file, t, &mut pcs, &instr, None).unwrap();
        assert_eq!(reg, PhysReg::vgpr(5));
        assert!(pcs.is_empty());
    }

    #[test]
    fn definition_reuses_dying_operand() {
        let mut program = program(8, 16);
        let mut env = env_for_test(&mut program);
        let mut reg_file = RegisterFile::new();
        fill(&mut env, &mut reg_file, 1, RegClass::V1, PhysReg::vgpr(3));
        reg_file.clear(PhysReg::vgpr(3), RegClass::V1);
        let t = Temp::new(2, RegClass::V1);
        let op = killed(Temp::new(1, RegClass::V1), PhysReg::vgpr(3));
        let instr = Instruction::new(Opcode::VMovB32, &[op], &[Definition::new(t)]);
        let mut pcs = CopyVec::new();
        let reg = env.get_reg(&reg_file, t, &mut pcs, &instr, None).unwrap();
        assert_eq!(reg, PhysReg::vgpr(3));
    }

    #[test]
    fn vector_member_follows_placed_part() {
        let mut program = program(8, 16);
        let mut env = env_for_test(&mut program);
        let mut reg_file = RegisterFile::new();
        fill(&mut env, &mut reg_file, 1, RegClass::V1, PhysReg::vgpr(4));
        let parts = [
            Operand::temp(Temp::new(1, RegClass::V1)),
            Operand::temp(Temp::new(2, RegClass::V1)),
        ];
        let vec = env.vector_store.push(VectorInfo::new(&parts, false));
        env.vectors.insert(1, vec);
        env.vectors.insert(2, vec);
        assert!(env.is_vector_intact(&reg_file, vec));

        let t = Temp::new(2, RegClass::V1);
        let instr = Instruction::new(Opcode::VMovB32, &[], &[Definition::new(t)]);
        let mut pcs = CopyVec::new();
        let reg = env.get_reg(&reg_file, t, &mut pcs, &instr, None).unwrap();
        assert_eq!(reg, PhysReg::vgpr(5));

        // A stranger in the way breaks the weak form.
        fill(&mut env, &mut reg_file, 3, RegClass::V1, PhysReg::vgpr(5));
        assert!(!env.is_vector_intact(&reg_file, vec));
    }

    #[test]
    fn full_file_moves_live_values() {
        let mut program = program(4, 16);
        let mut env = env_for_test(&mut program);
        env.vgpr_limit = 4;
        let mut reg_file = RegisterFile::new();
        fill(&mut env, &mut reg_file, 1, RegClass::V1, PhysReg::vgpr(0));
        fill(&mut env, &mut reg_file, 2, RegClass::V1, PhysReg::vgpr(2));
        // v1 and v3 are free but not adjacent.
        let t = Temp::new(3, RegClass::V2);
        let instr = Instruction::new(Opcode::VMovB32, &[], &[Definition::new(t)]);
        let mut pcs = CopyVec::new();
        let reg = env.get_reg(&reg_file, t, &mut pcs, &instr, None).unwrap();
        assert!(reg.reg() + 2 <= PhysReg::vgpr(4).reg());
        assert!(!pcs.is_empty());
    }

    #[test]
    fn create_vector_keeps_operands_in_place() {
        let mut program = program(8, 16);
        let mut env = env_for_test(&mut program);
        let mut reg_file = RegisterFile::new();
        let a = Temp::new(1, RegClass::V1);
        let b = Temp::new(2, RegClass::V1);
        fill(&mut env, &mut reg_file, 1, RegClass::V1, PhysReg::vgpr(2));
        fill(&mut env, &mut reg_file, 2, RegClass::V1, PhysReg::vgpr(3));
        reg_file.clear(PhysReg::vgpr(2), RegClass::V1);
        reg_file.clear(PhysReg::vgpr(3), RegClass::V1);
        let t = Temp::new(3, RegClass::V2);
        let instr = Instruction::new(
            Opcode::PCreateVector,
            &[killed(a, PhysReg::vgpr(2)), killed(b, PhysReg::vgpr(3))],
            &[Definition::new(t)],
        );
        let mut pcs = CopyVec::new();
        let reg = env
            .get_reg_create_vector(&reg_file, t, &mut pcs, &instr)
            .unwrap();
        assert_eq!(reg, PhysReg::vgpr(2));
        assert!(pcs.is_empty());
    }
}
