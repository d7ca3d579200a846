/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

use super::{Assignment, Env};
use crate::ir::{
    BlockKind, Definition, GfxLevel, Instruction, Opcode, Operand, Program, RegisterDemand,
};
use crate::moves::{MoveUnit, ParallelMoves};
use crate::regfile::RegisterFile;
use crate::{Block, Output, PhysReg, RegClass, RegType, RegallocOptions, Temp};
use std::collections::BTreeMap;

/// An allocator over `program` with default options.
pub(crate) fn env_for_test(program: &mut Program) -> Env<'_> {
    Env::new(program, &RegallocOptions::default())
}

/// Puts temp `id` at `reg`, creating it if the program doesn't know it
/// yet.
pub(crate) fn fill(env: &mut Env, reg_file: &mut RegisterFile, id: u32, rc: RegClass, reg: PhysReg) {
    while env.program.temp_rc.len() <= id as usize {
        env.program.temp_rc.push(rc);
    }
    env.program.temp_rc[id as usize] = rc;
    let len = (id as usize + 1).max(env.program.temp_rc.len());
    if env.assignments.len() < len {
        env.assignments.resize(len, Assignment::default());
    }
    env.assignments[id as usize] = Assignment::new(reg, rc);
    reg_file.fill_temp(reg, rc, id);
}

fn killed(temp: Temp) -> Operand {
    let mut op = Operand::temp(temp);
    op.set_first_kill(true);
    op
}

fn mov(def: Temp, value: u32) -> Instruction {
    Instruction::new(Opcode::VMovB32, &[Operand::c32(value)], &[Definition::new(def)])
}

fn single_block(vgprs: u16, sgprs: u16) -> Program {
    let mut program = Program::new(GfxLevel::Gfx10_3);
    program.add_block(BlockKind::TOP_LEVEL);
    program.max_reg_demand = RegisterDemand::new(vgprs, sgprs);
    program
}

fn exp(value: Temp) -> Instruction {
    Instruction::new(Opcode::Exp, &[Operand::temp(value)], &[])
}

fn branch() -> Instruction {
    Instruction::new(Opcode::PBranch, &[], &[])
}

/// A preheader, a loop header, a latch and the loop exit.
fn single_loop(program: &mut Program) -> [Block; 4] {
    let preheader = program.add_block(BlockKind::TOP_LEVEL | BlockKind::LOOP_PREHEADER);
    let header = program.add_block(BlockKind::LOOP_HEADER);
    let latch = program.add_block(BlockKind::CONTINUE);
    let exit = program.add_block(BlockKind::TOP_LEVEL | BlockKind::LOOP_EXIT);
    program.block_mut(header).loop_nest_depth = 1;
    program.block_mut(latch).loop_nest_depth = 1;
    program.add_edge(preheader, header);
    program.add_edge(header, latch);
    program.add_edge(latch, header);
    program.add_edge(header, exit);
    [preheader, header, latch, exit]
}

/// Allocates `program`, then runs the checker on the result.
fn allocate(program: &mut Program) -> Output {
    let output = crate::run(program, &RegallocOptions::default()).unwrap();
    check_assigned(program);
    if let Err(errors) = crate::checker::check(program, &output) {
        panic!("{}\n{}", errors, program);
    }
    output
}

/// Like `allocate`, with kill flags and live-in sets recomputed first.
fn allocate_with_liveness(program: &mut Program) -> Output {
    crate::liveness::compute(program);
    allocate(program)
}

fn find(program: &Program, block: Block, opcode: Opcode) -> &Instruction {
    program.blocks[block.index()]
        .instructions
        .iter()
        .find(|instr| instr.opcode == opcode)
        .unwrap()
}

/// Every temp operand and definition has a register of its file.
fn check_assigned(program: &Program) {
    for block in &program.blocks {
        for instr in &block.instructions {
            for def in instr.definitions.iter().filter(|d| d.is_temp()) {
                assert!(def.is_fixed(), "unassigned definition in {}", instr);
                assert_eq!(def.phys_reg().reg_type(), def.get_temp().reg_type(), "{}", instr);
            }
            for op in instr.operands.iter().filter(|op| op.is_temp()) {
                assert!(op.is_fixed(), "unassigned operand in {}", instr);
                assert_eq!(op.phys_reg().reg_type(), op.get_temp().reg_type(), "{}", instr);
            }
        }
    }
}

fn def_reg(program: &Program, block: usize, instr: usize) -> PhysReg {
    program.blocks[block].instructions[instr].definitions[0].phys_reg()
}

#[test]
fn straight_line_reuses_dying_operand() {
    let mut program = single_block(8, 8);
    let a = program.allocate_tmp(RegClass::V1);
    let b = program.allocate_tmp(RegClass::V1);
    let c = program.allocate_tmp(RegClass::V1);
    let b0 = crate::Block::new(0);
    program.push(b0, mov(a, 1));
    program.push(b0, mov(b, 2));
    program.push(
        b0,
        Instruction::new(Opcode::VAddF32, &[killed(a), killed(b)], &[Definition::new(c)]),
    );

    let output = allocate(&mut program);
    let ra = def_reg(&program, 0, 0);
    let rb = def_reg(&program, 0, 1);
    assert_ne!(ra, rb);
    assert_eq!(def_reg(&program, 0, 2), ra);
    assert_eq!(output.stats.instructions, 3);
    assert_eq!(output.stats.parallelcopies, 0);
    assert!(program.config.num_vgprs >= 2);
}

#[test]
fn allocation_is_deterministic() {
    let mut program = single_block(4, 8);
    let b0 = crate::Block::new(0);
    let temps: Vec<Temp> = (0..6).map(|_| program.allocate_tmp(RegClass::V1)).collect();
    for (i, &t) in temps.iter().enumerate() {
        program.push(b0, mov(t, i as u32));
    }
    let wide = program.allocate_tmp(RegClass::V2);
    program.push(
        b0,
        Instruction::new(
            Opcode::PCreateVector,
            &[killed(temps[0]), killed(temps[3])],
            &[Definition::new(wide)],
        ),
    );
    for &t in &temps[1..3] {
        program.push(b0, Instruction::new(Opcode::Exp, &[killed(t)], &[]));
    }
    for &t in &temps[4..] {
        program.push(b0, Instruction::new(Opcode::Exp, &[killed(t)], &[]));
    }
    program.push(b0, Instruction::new(Opcode::Exp, &[killed(wide)], &[]));

    let mut first = program.clone();
    let mut second = program.clone();
    allocate(&mut first);
    allocate(&mut second);
    assert_eq!(first, second);
}

#[test]
fn budget_grows_instead_of_failing() {
    let mut program = single_block(1, 8);
    let b0 = crate::Block::new(0);
    let a = program.allocate_tmp(RegClass::V1);
    let b = program.allocate_tmp(RegClass::V1);
    let c = program.allocate_tmp(RegClass::V1);
    program.push(b0, mov(a, 1));
    program.push(b0, mov(b, 2));
    program.push(
        b0,
        Instruction::new(Opcode::VAddF32, &[killed(a), killed(b)], &[Definition::new(c)]),
    );

    let output = allocate(&mut program);
    assert!(output.stats.budget_growths >= 1);
    assert!(program.max_reg_demand.vgpr >= 2);
    assert_ne!(def_reg(&program, 0, 0), def_reg(&program, 0, 1));
}

#[test]
fn too_many_live_registers_is_an_error() {
    let mut program = single_block(1000, 8);
    let err = crate::run(&mut program, &RegallocOptions::default()).unwrap_err();
    assert_eq!(err, crate::RegAllocError::TooManyLiveRegs(RegType::Vgpr));
}

#[test]
fn precolored_operand_is_copied_into_place() {
    let mut program = single_block(8, 8);
    let b0 = crate::Block::new(0);
    let a = program.allocate_tmp(RegClass::V1);
    let b = program.allocate_tmp(RegClass::V1);
    program.push(b0, mov(a, 1));
    let mut op = killed(a);
    op.set_fixed(PhysReg::vgpr(3));
    program.push(
        b0,
        Instruction::new(Opcode::VAddF32, &[Operand::c32(0), op], &[Definition::new(b)]),
    );

    let output = allocate(&mut program);
    let instrs = &program.blocks[0].instructions;
    assert_eq!(instrs.len(), 3);
    assert_eq!(instrs[1].opcode, Opcode::PParallelcopy);
    assert_eq!(instrs[1].definitions[0].phys_reg(), PhysReg::vgpr(3));
    // The copy reads `a` but doesn't inherit the flags of its use.
    let copied = instrs[1].operands[0];
    assert_eq!(copied.get_temp(), a);
    assert!(!copied.is_kill() && !copied.is_first_kill() && !copied.is_late_kill());

    let use_op = instrs[2].operands[1];
    assert_eq!(use_op.phys_reg(), PhysReg::vgpr(3));
    assert_ne!(use_op.get_temp(), a);
    assert_eq!(output.original(use_op.get_temp()), a);
    assert_eq!(output.stats.parallelcopies, 1);
}

#[test]
fn message_operand_lands_in_m0() {
    let mut program = single_block(8, 16);
    let b0 = crate::Block::new(0);
    let msg = program.allocate_tmp(RegClass::S1);
    program.push(
        b0,
        Instruction::new(Opcode::SMovB32, &[Operand::c32(5)], &[Definition::new(msg)]),
    );
    program.push(b0, Instruction::new(Opcode::SSendmsg, &[killed(msg)], &[]));

    allocate(&mut program);
    assert_eq!(def_reg(&program, 0, 0), PhysReg::M0);
    assert_eq!(program.blocks[0].instructions.len(), 2);
}

#[test]
fn linear_vgprs_live_at_the_top() {
    let mut program = single_block(8, 8);
    let b0 = crate::Block::new(0);
    let l = program.allocate_tmp(RegClass::V1_LINEAR);
    let a = program.allocate_tmp(RegClass::V1);
    program.push(
        b0,
        Instruction::new(Opcode::PStartLinearVgpr, &[], &[Definition::new(l)]),
    );
    program.push(b0, mov(a, 1));
    program.push(b0, Instruction::new(Opcode::Exp, &[killed(a)], &[]));
    program.push(b0, Instruction::new(Opcode::PEndLinearVgpr, &[killed(l)], &[]));

    allocate(&mut program);
    assert_eq!(def_reg(&program, 0, 0), PhysReg::vgpr(7));
    assert!(def_reg(&program, 0, 1) < PhysReg::vgpr(7));
}

#[test]
fn phi_operands_share_the_phi_register() {
    let mut program = Program::new(GfxLevel::Gfx10_3);
    program.max_reg_demand = RegisterDemand::new(8, 8);
    let b0 = program.add_block(BlockKind::TOP_LEVEL);
    let b1 = program.add_block(BlockKind::NONE);
    let b2 = program.add_block(BlockKind::NONE);
    let b3 = program.add_block(BlockKind::TOP_LEVEL | BlockKind::MERGE);
    program.add_edge(b0, b1);
    program.add_edge(b0, b2);
    program.add_edge(b1, b3);
    program.add_edge(b2, b3);

    let x = program.allocate_tmp(RegClass::V1);
    let a = program.allocate_tmp(RegClass::V1);
    let b = program.allocate_tmp(RegClass::V1);
    let c = program.allocate_tmp(RegClass::V1);
    let d = program.allocate_tmp(RegClass::V1);
    // Keeps v0 busy in block1 only.
    program.push(b1, mov(x, 7));
    program.push(b1, mov(a, 1));
    program.push(b1, Instruction::new(Opcode::Exp, &[killed(x)], &[]));
    program.push(b2, mov(b, 2));
    program.push(
        b3,
        Instruction::new(Opcode::PPhi, &[killed(a), killed(b)], &[Definition::new(c)]),
    );
    program.push(
        b3,
        Instruction::new(Opcode::VAddF32, &[Operand::c32(1), killed(c)], &[Definition::new(d)]),
    );

    let output = allocate(&mut program);
    let ra = def_reg(&program, 1, 1);
    assert_eq!(def_reg(&program, 2, 0), ra);
    assert_eq!(def_reg(&program, 3, 0), ra);
    assert_eq!(output.stats.parallelcopies, 0);
    assert_eq!(output.stats.blocks, 4);
}

#[test]
fn loop_carried_value_stays_put() {
    let mut program = Program::new(GfxLevel::Gfx10_3);
    program.max_reg_demand = RegisterDemand::new(8, 8);
    let b0 = program.add_block(BlockKind::TOP_LEVEL | BlockKind::LOOP_PREHEADER);
    let b1 = program.add_block(BlockKind::LOOP_HEADER);
    let b2 = program.add_block(BlockKind::TOP_LEVEL | BlockKind::LOOP_EXIT);
    program.block_mut(b1).loop_nest_depth = 1;
    program.add_edge(b0, b1);
    program.add_edge(b1, b1);
    program.add_edge(b1, b2);

    let a = program.allocate_tmp(RegClass::V1);
    let p = program.allocate_tmp(RegClass::V1);
    let q = program.allocate_tmp(RegClass::V1);
    program.push(b0, mov(a, 0));
    program.push(
        b1,
        Instruction::new(Opcode::PPhi, &[killed(a), killed(q)], &[Definition::new(p)]),
    );
    program.push(
        b1,
        Instruction::new(Opcode::VAddF32, &[Operand::c32(1), killed(p)], &[Definition::new(q)]),
    );

    let output = allocate(&mut program);
    let ra = def_reg(&program, 0, 0);
    let phi = &program.blocks[1].instructions[0];
    assert_eq!(phi.definitions[0].phys_reg(), ra);
    assert_eq!(phi.operands[1].phys_reg(), ra);
    assert_eq!(phi.operands[1].get_temp(), q);
    assert_eq!(def_reg(&program, 1, 1), ra);
    assert_eq!(output.stats.parallelcopies, 0);
}

#[test]
fn skipping_the_optimistic_path_still_allocates() {
    let mut program = single_block(4, 8);
    let b0 = crate::Block::new(0);
    let temps: Vec<Temp> = (0..4).map(|_| program.allocate_tmp(RegClass::V1)).collect();
    for (i, &t) in temps.iter().enumerate() {
        program.push(b0, mov(t, i as u32));
    }
    for &t in &temps {
        program.push(b0, Instruction::new(Opcode::Exp, &[killed(t)], &[]));
    }

    let mut options = RegallocOptions::default();
    options.policy.skip_optimistic_path = true;
    let output = crate::run(&mut program, &options).unwrap();
    check_assigned(&program);
    assert!(crate::checker::check(&program, &output).is_ok());
    let mut regs: Vec<PhysReg> = (0..4).map(|i| def_reg(&program, 0, i)).collect();
    regs.sort();
    regs.dedup();
    assert_eq!(regs.len(), 4);
}

#[test]
fn crossed_fixed_operands_are_swapped() {
    let mut program = single_block(8, 8);
    let b0 = Block::new(0);
    let a = program.allocate_tmp(RegClass::V1);
    let b = program.allocate_tmp(RegClass::V1);
    let c = program.allocate_tmp(RegClass::V1);
    program.push(
        b0,
        Instruction::new(Opcode::VMovB32, &[Operand::c32(1)], &[Definition::fixed(a, PhysReg::vgpr(5))]),
    );
    program.push(
        b0,
        Instruction::new(Opcode::VMovB32, &[Operand::c32(2)], &[Definition::fixed(b, PhysReg::vgpr(6))]),
    );
    let mut op_a = killed(a);
    op_a.set_fixed(PhysReg::vgpr(6));
    let mut op_b = killed(b);
    op_b.set_fixed(PhysReg::vgpr(5));
    program.push(b0, Instruction::new(Opcode::VAddF32, &[op_a, op_b], &[Definition::new(c)]));
    program.push(b0, Instruction::new(Opcode::Exp, &[killed(c)], &[]));

    let output = allocate(&mut program);
    let instrs = &program.blocks[0].instructions;
    assert_eq!(instrs.len(), 5);
    let copy = &instrs[2];
    assert_eq!(copy.opcode, Opcode::PParallelcopy);
    assert_eq!(copy.operands.len(), 2);

    // Lower the copy and run it on the values.
    let mut moves = ParallelMoves::new();
    for (op, def) in copy.operands.iter().zip(copy.definitions.iter()) {
        moves.add(op.phys_reg(), def.phys_reg(), def.bytes(), ());
    }
    let (unit, moves) = moves.resolve();
    assert_eq!(unit, MoveUnit::Dword);
    assert!(moves.needs_scratch());
    let mut state: BTreeMap<PhysReg, Temp> = BTreeMap::new();
    state.insert(PhysReg::vgpr(5), a);
    state.insert(PhysReg::vgpr(6), b);
    for (src, dst, ()) in moves.with_scratch(PhysReg::vgpr(7)) {
        let value = state[&src];
        state.insert(dst, value);
    }
    assert_eq!(state[&PhysReg::vgpr(6)], a);
    assert_eq!(state[&PhysReg::vgpr(5)], b);

    let add = &instrs[3];
    assert_eq!(add.operands[0].phys_reg(), PhysReg::vgpr(6));
    assert_eq!(output.original(add.operands[0].get_temp()), a);
    assert_eq!(add.operands[1].phys_reg(), PhysReg::vgpr(5));
    assert_eq!(output.original(add.operands[1].get_temp()), b);
    assert_eq!(output.stats.parallelcopies, 1);
}

#[test]
fn loop_header_phi_with_dying_back_edge_operand() {
    let mut program = Program::new(GfxLevel::Gfx10_3);
    let [b0, b1, b2, b3] = single_loop(&mut program);
    let init = program.allocate_tmp(RegClass::V1);
    let acc = program.allocate_tmp(RegClass::V1);
    let next_acc = program.allocate_tmp(RegClass::V1);
    let counter = program.allocate_tmp(RegClass::S1);
    let next_counter = program.allocate_tmp(RegClass::S1);

    program.push(b0, mov(init, 0));
    program.push(b0, branch());
    // No operand register to try first for the counter.
    program.push(
        b1,
        Instruction::new(
            Opcode::PLinearPhi,
            &[Operand::c32(0), Operand::temp(next_counter)],
            &[Definition::new(counter)],
        ),
    );
    program.push(
        b1,
        Instruction::new(
            Opcode::PPhi,
            &[Operand::temp(init), Operand::temp(next_acc)],
            &[Definition::new(acc)],
        ),
    );
    program.push(b1, branch());
    program.push(
        b2,
        Instruction::new(
            Opcode::VAddF32,
            &[Operand::c32(1), Operand::temp(acc)],
            &[Definition::new(next_acc)],
        ),
    );
    program.push(
        b2,
        Instruction::new(
            Opcode::SAddI32,
            &[Operand::temp(counter), Operand::c32(1)],
            &[
                Definition::new(next_counter),
                Definition::physical(PhysReg::SCC, RegClass::S1),
            ],
        ),
    );
    program.push(b2, branch());
    program.push(b3, exp(acc));
    program.push(b3, Instruction::new(Opcode::SEndpgm, &[], &[]));

    let output = allocate_with_liveness(&mut program);
    let phi = find(&program, b1, Opcode::PLinearPhi);
    assert!(phi.definitions[0].is_fixed());
    assert_eq!(phi.definitions[0].phys_reg().reg_type(), RegType::Sgpr);
    let back_edge = phi.operands[1];
    assert!(back_edge.is_fixed());
    assert_eq!(output.original(back_edge.get_temp()), next_counter);
    assert_eq!(output.stats.blocks, 4);
}

#[test]
fn value_moved_inside_loop_gets_header_phi() {
    let mut program = Program::new(GfxLevel::Gfx10_3);
    let [b0, b1, b2, b3] = single_loop(&mut program);
    let x = program.allocate_tmp(RegClass::V1);
    let y = program.allocate_tmp(RegClass::V1);
    let z = program.allocate_tmp(RegClass::V1);

    program.push(
        b0,
        Instruction::new(Opcode::VMovB32, &[Operand::c32(1)], &[Definition::fixed(x, PhysReg::vgpr(0))]),
    );
    program.push(b0, branch());
    program.push(b1, branch());
    program.push(b2, exp(x));
    program.push(b2, mov(y, 2));
    // `y` has to be read from the register `x` lives in.
    program.push(
        b2,
        Instruction::new(
            Opcode::VAddF32,
            &[Operand::c32(0), Operand::fixed(y, PhysReg::vgpr(0))],
            &[Definition::new(z)],
        ),
    );
    program.push(b2, exp(z));
    program.push(b2, exp(x));
    program.push(b2, branch());
    program.push(b3, exp(x));

    let output = allocate_with_liveness(&mut program);
    assert!(output.stats.parallelcopies >= 1);
    assert!(output.stats.phis_inserted >= 1);

    let phi = &program.blocks[b1.index()].instructions[0];
    assert_eq!(phi.opcode, Opcode::PPhi);
    let merged = phi.definitions[0].get_temp();
    assert_ne!(merged, x);
    assert_eq!(output.original(merged), x);
    assert_eq!(phi.definitions[0].phys_reg(), PhysReg::vgpr(0));
    assert_eq!(phi.operands[0].get_temp(), x);
    let moved = phi.operands[1].get_temp();
    assert_ne!(moved, x);
    assert_eq!(output.original(moved), x);
    assert_ne!(phi.operands[1].phys_reg(), PhysReg::vgpr(0));

    // Uses before the move read the phi, later ones the moved value.
    let body = &program.blocks[b2.index()].instructions;
    assert_eq!(body[0].operands[0].get_temp(), merged);
    let last_use = body.iter().rev().find(|instr| instr.opcode == Opcode::Exp).unwrap();
    assert_eq!(last_use.operands[0].get_temp(), moved);
    assert_eq!(last_use.operands[0].phys_reg(), phi.operands[1].phys_reg());
    assert_eq!(find(&program, b3, Opcode::Exp).operands[0].get_temp(), merged);
}

/// Fixed-seed sweep over generated programs with control flow, each
/// allocated and then checked.
#[cfg(feature = "fuzzing")]
#[test]
fn generated_programs_pass_the_checker() {
    use crate::fuzzing::arbitrary::Unstructured;
    use crate::fuzzing::program::{arbitrary_program_with_options, Options};

    let mut checked = 0;
    for seed in 0..256u64 {
        // xorshift64
        let mut state = seed.wrapping_mul(0x9e37_79b9_7f4a_7c15) | 1;
        let bytes: Vec<u8> = (0..4096)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                state as u8
            })
            .collect();
        let mut u = Unstructured::new(&bytes);
        let Ok(mut program) = arbitrary_program_with_options(&mut u, &Options::default()) else {
            continue;
        };

        let mut options = RegallocOptions::default();
        options.policy.skip_optimistic_path = seed % 2 == 1;
        let output = match crate::run(&mut program, &options) {
            Ok(output) => output,
            Err(crate::RegAllocError::TooManyLiveRegs(_)) => continue,
            Err(e) => panic!("seed {}: regalloc did not succeed: {}", seed, e),
        };
        if let Err(errors) = crate::checker::check(&program, &output) {
            panic!("seed {}: {}\n{}", seed, errors, program);
        }
        checked += 1;
    }
    assert!(checked > 0);
}
