/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Reference liveness analysis.
//!
//! The allocator expects its input to carry liveness: the live-in set
//! of every block, kill flags on operands, dead flags on definitions
//! and the register demand of blocks and program. This pass computes
//! all of these from scratch, which is what test harnesses and the
//! tools need before handing a program to [`crate::run`].
//!
//! Linear values (sgprs and linear vgprs) flow along the linear CFG,
//! all other vgprs along the logical CFG. A phi operand is live-out
//! of the matching predecessor only; it is not live into the phi's
//! block.

use crate::ir::{BasicBlock, Program, RegisterDemand};
use crate::target::update_vgpr_sgpr_demand;
use crate::{Block, RegClass};
use smallvec::SmallVec;
use std::collections::BTreeSet;

fn demand_of<'a>(temp_rc: &[RegClass], ids: impl Iterator<Item = &'a u32>) -> RegisterDemand {
    let mut demand = RegisterDemand::default();
    for &id in ids {
        demand.add(temp_rc[id as usize]);
    }
    demand
}

/// Values live at the end of `block`, not counting phi operands.
fn live_out(
    blocks: &[BasicBlock],
    temp_rc: &[RegClass],
    live_in: &[BTreeSet<u32>],
    block: Block,
) -> BTreeSet<u32> {
    let bb = &blocks[block.index()];
    let mut live = BTreeSet::new();
    for &succ in &bb.linear_succs {
        live.extend(
            live_in[succ.index()]
                .iter()
                .filter(|&&id| temp_rc[id as usize].is_linear()),
        );
    }
    for &succ in &bb.logical_succs {
        live.extend(
            live_in[succ.index()]
                .iter()
                .filter(|&&id| !temp_rc[id as usize].is_linear()),
        );
    }
    live
}

/// Operands of phis in the successors of `block` that read the value
/// flowing in from `block`, as (successor, instruction, operand).
fn phi_uses(blocks: &[BasicBlock], block: Block) -> SmallVec<[(Block, usize, usize); 8]> {
    let bb = &blocks[block.index()];
    let mut succs: SmallVec<[Block; 4]> = bb.linear_succs.iter().copied().collect();
    for &succ in &bb.logical_succs {
        if !succs.contains(&succ) {
            succs.push(succ);
        }
    }

    let mut uses = SmallVec::new();
    for succ in succs {
        let succ_bb = &blocks[succ.index()];
        for (i, phi) in succ_bb.instructions.iter().enumerate() {
            if !phi.is_phi() {
                break;
            }
            for (j, &pred) in succ_bb.phi_preds(phi).iter().enumerate() {
                if pred == block && phi.operands.get(j).map_or(false, |op| op.is_temp()) {
                    uses.push((succ, i, j));
                }
            }
        }
    }
    uses
}

/// Walks `bb` backwards from `live` (its live-out set), setting kill
/// flags on the way. Leaves the live-in set in `live` and returns the
/// block's maximum demand and its demand right after the phis.
fn scan_block(
    bb: &mut BasicBlock,
    temp_rc: &[RegClass],
    live: &mut BTreeSet<u32>,
) -> (RegisterDemand, RegisterDemand) {
    let mut max_demand = demand_of(temp_rc, live.iter());
    let num_phis = bb.instructions.iter().take_while(|i| i.is_phi()).count();

    for instr in bb.instructions[num_phis..].iter_mut().rev() {
        let mut after = demand_of(temp_rc, live.iter());
        for def in instr.definitions.iter_mut() {
            if !def.is_temp() {
                continue;
            }
            let used = live.remove(&def.temp_id());
            def.set_kill(!used);
            if !used {
                after.add(def.reg_class());
            }
        }

        let mut killed: SmallVec<[u32; 4]> = SmallVec::new();
        for op in instr.operands.iter_mut() {
            if !op.is_temp() {
                continue;
            }
            let id = op.temp_id();
            op.set_kill(false);
            if killed.contains(&id) {
                op.set_kill(true);
            } else if live.insert(id) {
                killed.push(id);
                op.set_first_kill(true);
                if op.is_late_kill() {
                    after.add(op.reg_class());
                }
            }
        }

        max_demand.update(after);
        max_demand.update(demand_of(temp_rc, live.iter()));
    }

    let entry_demand = demand_of(temp_rc, live.iter());
    for phi in bb.instructions[..num_phis].iter_mut() {
        for def in phi.definitions.iter_mut() {
            if def.is_temp() {
                let used = live.remove(&def.temp_id());
                def.set_kill(!used);
            }
        }
    }
    (max_demand, entry_demand)
}

/// Computes live-in sets, kill flags and register demand for
/// `program`, replacing whatever was there before.
///
/// The program's register budget is reset to what is addressable at
/// the wave count its demand allows.
pub fn compute(program: &mut Program) {
    let num_blocks = program.blocks.len();
    let Program {
        blocks, temp_rc, ..
    } = &mut *program;

    let mut live_in: Vec<BTreeSet<u32>> = vec![BTreeSet::new(); num_blocks];
    let mut changed = true;
    while changed {
        changed = false;
        for b in (0..num_blocks).rev() {
            let block = Block::new(b);
            let mut live = live_out(blocks, temp_rc, &live_in, block);
            for (succ, i, j) in phi_uses(blocks, block) {
                live.insert(blocks[succ.index()].instructions[i].operands[j].temp_id());
            }
            scan_block(&mut blocks[b], temp_rc, &mut live);
            if live != live_in[b] {
                live_in[b] = live;
                changed = true;
            }
        }
    }

    // Phi operands are killed in the predecessor unless the value is
    // live-out there anyway or an earlier phi already reads it.
    let mut program_demand = RegisterDemand::default();
    for b in 0..num_blocks {
        let block = Block::new(b);
        let mut live = live_out(blocks, temp_rc, &live_in, block);
        for (succ, i, j) in phi_uses(blocks, block) {
            let op = &mut blocks[succ.index()].instructions[i].operands[j];
            let killed = live.insert(op.temp_id());
            op.set_kill(false);
            op.set_first_kill(killed);
        }

        let (max_demand, entry_demand) = scan_block(&mut blocks[b], temp_rc, &mut live);
        debug_assert_eq!(live, live_in[b]);
        let bb = &mut blocks[b];
        bb.register_demand = max_demand;
        bb.live_in_demand = entry_demand;
        program_demand.update(max_demand);
        trace!(
            "block{}: live-in {:?}, demand v{} s{}",
            b,
            live,
            max_demand.vgpr,
            max_demand.sgpr
        );
    }

    program.live_in = live_in;
    update_vgpr_sgpr_demand(program, program_demand);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BlockKind, GfxLevel, Instruction, Opcode, Operand};
    use crate::{Definition, Temp};

    fn def(t: Temp) -> Definition {
        Definition::new(t)
    }

    fn op(t: Temp) -> Operand {
        Operand::temp(t)
    }

    #[test]
    fn kill_flags_in_one_block() {
        let mut program = Program::new(GfxLevel::Gfx10_3);
        let b0 = program.add_block(BlockKind::TOP_LEVEL);
        let a = program.allocate_tmp(RegClass::V1);
        let b = program.allocate_tmp(RegClass::V1);
        let unused = program.allocate_tmp(RegClass::V1);
        program.push(b0, Instruction::new(Opcode::VMovB32, &[Operand::c32(1)], &[def(a)]));
        program.push(b0, Instruction::new(Opcode::VAddF32, &[op(a), op(a)], &[def(b)]));
        program.push(b0, Instruction::new(Opcode::VMovB32, &[op(b)], &[def(unused)]));
        compute(&mut program);

        let instrs = &program.blocks[0].instructions;
        assert!(!instrs[0].definitions[0].is_kill());
        assert!(instrs[1].operands[0].is_first_kill());
        assert!(instrs[1].operands[1].is_kill());
        assert!(!instrs[1].operands[1].is_first_kill());
        assert!(instrs[2].operands[0].is_first_kill());
        assert!(instrs[2].definitions[0].is_kill());
        assert!(program.live_in[0].is_empty());
        assert_eq!(program.blocks[0].register_demand, RegisterDemand::new(1, 0));
    }

    #[test]
    fn late_kill_counts_toward_demand() {
        let mut program = Program::new(GfxLevel::Gfx10_3);
        let b0 = program.add_block(BlockKind::TOP_LEVEL);
        let a = program.allocate_tmp(RegClass::V2);
        let b = program.allocate_tmp(RegClass::V1);
        let c = program.allocate_tmp(RegClass::V1);
        program.push(b0, Instruction::new(Opcode::PCreateVector, &[Operand::c32(0), Operand::c32(0)], &[def(a)]));
        let mut load = Instruction::new(Opcode::GlobalLoadDword, &[op(a)], &[def(b)]);
        load.operands[0].set_late_kill(true);
        program.push(b0, load);
        program.push(b0, Instruction::new(Opcode::VMovB32, &[op(b)], &[def(c)]));
        program.push(b0, Instruction::new(Opcode::Exp, &[op(c)], &[]));
        compute(&mut program);

        assert!(program.blocks[0].instructions[1].operands[0].is_kill());
        assert_eq!(program.blocks[0].register_demand.vgpr, 3);
    }

    /// An if/else as the compiler lays it out: the invert block only
    /// exists on the linear CFG.
    #[test]
    fn vgprs_follow_logical_edges() {
        let mut program = Program::new(GfxLevel::Gfx10_3);
        let entry = program.add_block(BlockKind::TOP_LEVEL | BlockKind::BRANCH);
        let then = program.add_block(BlockKind::NONE);
        let invert = program.add_block(BlockKind::INVERT);
        let els = program.add_block(BlockKind::NONE);
        let merge = program.add_block(BlockKind::TOP_LEVEL | BlockKind::MERGE);
        program.add_edge(entry, then);
        program.add_logical_edge(entry, els);
        program.add_linear_edge(entry, invert);
        program.add_linear_edge(then, invert);
        program.add_logical_edge(then, merge);
        program.add_linear_edge(invert, els);
        program.add_linear_edge(invert, merge);
        program.add_edge(els, merge);

        let v = program.allocate_tmp(RegClass::V1);
        let s = program.allocate_tmp(RegClass::S1);
        let p = program.allocate_tmp(RegClass::V1);
        let q = program.allocate_tmp(RegClass::V1);
        let r = program.allocate_tmp(RegClass::V1);
        program.push(entry, Instruction::new(Opcode::VMovB32, &[Operand::c32(0)], &[def(v)]));
        program.push(entry, Instruction::new(Opcode::SMovB32, &[Operand::c32(0)], &[def(s)]));
        program.push(then, Instruction::new(Opcode::VMovB32, &[Operand::c32(1)], &[def(p)]));
        program.push(els, Instruction::new(Opcode::VMovB32, &[Operand::c32(2)], &[def(q)]));
        program.push(merge, Instruction::new(Opcode::PPhi, &[op(p), op(q)], &[def(r)]));
        program.push(merge, Instruction::new(Opcode::VAddF32, &[op(v), op(r)], &[Definition::unassigned(RegClass::V1)]));
        program.push(merge, Instruction::new(Opcode::SSendmsg, &[op(s)], &[]));
        compute(&mut program);

        for block in [then, els, merge] {
            assert!(program.live_in[block.index()].contains(&v.id()));
            assert!(program.live_in[block.index()].contains(&s.id()));
        }
        assert!(!program.live_in[invert.index()].contains(&v.id()));
        assert!(program.live_in[invert.index()].contains(&s.id()));
        // Phi operands are live-out of the predecessor, not live-in.
        assert!(!program.live_in[merge.index()].contains(&p.id()));
        let phi = &program.blocks[merge.index()].instructions[0];
        assert!(phi.operands[0].is_first_kill());
        assert!(phi.operands[1].is_first_kill());
    }

    #[test]
    fn loop_keeps_outside_values_alive() {
        let mut program = Program::new(GfxLevel::Gfx10_3);
        let pre = program.add_block(BlockKind::TOP_LEVEL | BlockKind::LOOP_PREHEADER);
        let header = program.add_block(BlockKind::LOOP_HEADER);
        let exit = program.add_block(BlockKind::TOP_LEVEL | BlockKind::LOOP_EXIT);
        program.add_edge(pre, header);
        program.add_edge(header, header);
        program.add_edge(header, exit);

        let a = program.allocate_tmp(RegClass::V1);
        let i0 = program.allocate_tmp(RegClass::S1);
        let i1 = program.allocate_tmp(RegClass::S1);
        let i2 = program.allocate_tmp(RegClass::S1);
        program.push(pre, Instruction::new(Opcode::VMovB32, &[Operand::c32(0)], &[def(a)]));
        program.push(pre, Instruction::new(Opcode::SMovB32, &[Operand::c32(0)], &[def(i0)]));
        program.push(header, Instruction::new(Opcode::PLinearPhi, &[op(i0), op(i2)], &[def(i1)]));
        program.push(header, Instruction::new(Opcode::SAddI32, &[op(i1), Operand::c32(1)], &[def(i2)]));
        program.push(exit, Instruction::new(Opcode::Exp, &[op(a)], &[]));
        compute(&mut program);

        assert!(program.live_in[header.index()].contains(&a.id()));
        assert!(!program.live_in[header.index()].contains(&i2.id()));
        let add = &program.blocks[header.index()].instructions[1];
        assert!(add.operands[0].is_first_kill());
        // The back-edge value dies at the phi.
        let phi = &program.blocks[header.index()].instructions[0];
        assert!(phi.operands[1].is_kill());
        assert_eq!(program.blocks[header.index()].live_in_demand, RegisterDemand::new(1, 1));
    }
}
