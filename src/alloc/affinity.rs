/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Placement hints gathered in one backward pass before allocation.
//!
//! Values joined by a phi (and the values copied into those) should
//! share a register, so they are grouped and every member points at the
//! group's phi. Operands of vector-building instructions are recorded as
//! vector groups, and a few values are marked as preferring `vcc` or
//! `m0`.

use super::data_structures::{VectorIdx, VectorInfo};
use super::encoding::sop2_can_use_sopk;
use super::Env;
use crate::ir::{BlockKind, GfxLevel, Instruction, Opcode, Operand};
use crate::target::op_fixed_to_def;
use crate::{FxHashMap, PhysReg, RegClass, RegType, Temp};

impl<'a> Env<'a> {
    /// Hints that depend on a single instruction.
    fn collect_hints(&mut self, instr: &Instruction) {
        match instr.opcode {
            Opcode::PCreateVector => {
                let ty = instr.definitions[0].reg_class().reg_type();
                let mut vec: Option<VectorIdx> = None;
                for op in &instr.operands {
                    if op.is_temp() && op.is_first_kill() && op.get_temp().reg_type() == ty {
                        let idx = *vec.get_or_insert_with(|| {
                            self.vector_store.push(VectorInfo::new(&instr.operands, false))
                        });
                        self.vectors.insert(op.temp_id(), idx);
                    }
                }
            }
            _ if instr.is_mimg()
                && instr.operands.len() > 4
                && !instr.mimg.strict_wqm
                && self.gfx_level < GfxLevel::Gfx12 =>
            {
                // Address components: nice to have in order, but a
                // separate register each is acceptable too.
                let idx = self
                    .vector_store
                    .push(VectorInfo::new(&instr.operands[3..], true));
                for op in &instr.operands[3..] {
                    if op.is_temp() {
                        self.vectors.insert(op.temp_id(), idx);
                    }
                }
            }
            Opcode::PSplitVector if instr.operands[0].is_first_kill_before_def() => {
                self.split_vectors
                    .insert(
                        instr.operands[0].temp_id(),
                        instr.definitions.iter().copied().collect(),
                    );
            }
            _ if instr.is_vopc() && !instr.is_vop3() => {
                if !instr.is_sdwa() || self.gfx_level == GfxLevel::Gfx8 {
                    self.assignments[instr.definitions[0].temp_id() as usize].vcc = true;
                }
            }
            _ if instr.is_vop2() && !instr.is_vop3() => {
                if instr.operands.len() == 3
                    && instr.operands[2].is_temp()
                    && instr.operands[2].reg_class().reg_type() == RegType::Sgpr
                {
                    self.assignments[instr.operands[2].temp_id() as usize].vcc = true;
                }
                if instr.definitions.len() == 2 {
                    self.assignments[instr.definitions[1].temp_id() as usize].vcc = true;
                }
            }
            Opcode::SAndB32 | Opcode::SAndB64 => {
                // A branch on the result can test vccz directly.
                let scc_live = instr.definitions.get(1).map_or(false, |d| !d.is_kill());
                if scc_live
                    && instr.operands[0].is_temp()
                    && instr.operands[1].is_fixed()
                    && instr.operands[1].phys_reg() == PhysReg::EXEC
                {
                    self.assignments[instr.operands[0].temp_id() as usize].vcc = true;
                }
            }
            Opcode::SSendmsg => {
                if let Some(op) = instr.operands.first().filter(|op| op.is_temp()) {
                    self.assignments[op.temp_id() as usize].m0 = true;
                }
            }
            _ => {}
        }
    }

    /// Gives the operands of a phi that defines part of a vector group
    /// their own group, laid out like the destination's, one per
    /// predecessor.
    fn create_phi_vector_affinities(
        &mut self,
        phi: &Instruction,
        vector_phis: &mut FxHashMap<VectorIdx, Vec<VectorIdx>>,
    ) {
        let def = phi.definitions[0];
        let Some(&dest) = self.vectors.get(&def.temp_id()) else {
            return;
        };

        if !vector_phis.contains_key(&dest) {
            let ty = def.reg_class().reg_type();
            let template = VectorInfo {
                is_weak: self.vector_store[dest].is_weak,
                parts: self.vector_store[dest]
                    .parts
                    .iter()
                    .map(|part| Operand::undef(RegClass::get(ty, part.bytes())))
                    .collect(),
            };
            let srcs = (0..phi.operands.len())
                .map(|_| self.vector_store.push(template.clone()))
                .collect();
            vector_phis.insert(dest, srcs);
        }
        let srcs = &vector_phis[&dest];

        let Some(index) = self.vector_store[dest]
            .parts
            .iter()
            .position(|part| part.is_temp() && part.temp_id() == def.temp_id())
        else {
            return;
        };

        for (i, op) in phi.operands.iter().enumerate().rev() {
            if !op.is_temp() || op.reg_class() != def.reg_class() {
                continue;
            }
            self.vector_store[srcs[i]].parts[index] = *op;
            self.vectors.insert(op.temp_id(), srcs[i]);
        }
    }

    /// Walks the program backwards once, collecting phi affinities and
    /// the per-instruction hints.
    pub(crate) fn get_affinities(&mut self) {
        let blocks = std::mem::take(&mut self.program.blocks);
        let mut phi_resources: Vec<Vec<Temp>> = Vec::new();
        let mut temp_to_phi_resources: FxHashMap<u32, usize> = FxHashMap::default();

        for (b, block) in blocks.iter().enumerate().rev() {
            let num_phis = block.instructions.iter().take_while(|i| i.is_phi()).count();

            for instr in block.instructions[num_phis..].iter().rev() {
                self.collect_hints(instr);

                let op_fixed_to_def0 = op_fixed_to_def(instr);
                for (i, def) in instr.definitions.iter().enumerate() {
                    if !def.is_temp() {
                        continue;
                    }
                    // The last definition seen is the first in program
                    // order.
                    let Some(&index) = temp_to_phi_resources.get(&def.temp_id()) else {
                        continue;
                    };
                    if def.reg_class() != phi_resources[index][0].reg_class() {
                        continue;
                    }
                    phi_resources[index][0] = def.get_temp();

                    // Copies and two-address forms can share the register
                    // with their source.
                    let op = if instr.opcode == Opcode::PParallelcopy {
                        instr.operands.get(i)
                    } else if let (0, Some(fixed)) = (i, op_fixed_to_def0) {
                        instr.operands.get(fixed)
                    } else if self.vop3_can_use_vop2acc(instr) {
                        instr.operands.get(2)
                    } else if i == 0 && sop2_can_use_sopk(instr) {
                        instr.operands.get(instr.operands[0].is_literal() as usize)
                    } else {
                        continue;
                    };

                    if let Some(op) = op {
                        if op.is_temp()
                            && op.is_first_kill_before_def()
                            && def.reg_class() == op.reg_class()
                        {
                            phi_resources[index].push(op.get_temp());
                            temp_to_phi_resources.insert(op.temp_id(), index);
                        }
                    }
                }
            }

            let mut vector_phis = FxHashMap::default();
            for phi in block.instructions[..num_phis].iter().rev() {
                let def = phi.definitions[0];
                if def.is_kill() || def.is_fixed() {
                    continue;
                }
                debug_assert!(def.is_temp());

                let index = match temp_to_phi_resources.get(&def.temp_id()) {
                    Some(&index) => {
                        phi_resources[index][0] = def.get_temp();
                        index
                    }
                    None => {
                        phi_resources.push(vec![def.get_temp()]);
                        phi_resources.len() - 1
                    }
                };

                for op in &phi.operands {
                    if op.is_temp() && op.is_kill() && op.reg_class() == def.reg_class() {
                        phi_resources[index].push(op.get_temp());
                        if block.kind.contains(BlockKind::LOOP_HEADER) {
                            continue;
                        }
                        temp_to_phi_resources.insert(op.temp_id(), index);
                    }
                }

                self.create_phi_vector_affinities(phi, &mut vector_phis);
            }

            // Loop header phis go first so that nested loops share
            // their groups.
            if block.kind.contains(BlockKind::LOOP_EXIT) {
                let mut header = b;
                while header > 0 && blocks[header - 1].loop_nest_depth > block.loop_nest_depth {
                    header -= 1;
                }

                for phi in blocks[header].instructions.iter().take_while(|i| i.is_phi()) {
                    let def = phi.definitions[0];
                    if def.is_kill() || def.is_fixed() {
                        continue;
                    }
                    let index = *temp_to_phi_resources
                        .entry(def.temp_id())
                        .or_insert_with(|| {
                            phi_resources.push(vec![def.get_temp()]);
                            phi_resources.len() - 1
                        });
                    for op in phi.operands.iter().skip(1) {
                        if op.is_temp() && op.is_kill() && op.reg_class() == def.reg_class() {
                            temp_to_phi_resources.insert(op.temp_id(), index);
                        }
                    }
                }
            }
        }
        self.program.blocks = blocks;

        for group in &phi_resources {
            let leader = group[0].id();
            for member in &group[1..] {
                if member.id() != leader {
                    self.assignments[member.id() as usize].affinity = leader;
                }
            }
        }
        trace!(
            "{} affinity groups, {} vector hints",
            phi_resources.len(),
            self.vectors.len()
        );
    }
}
