/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Checker: verifies that the registers chosen by the allocator,
//! together with the parallel copies and phis it inserted, keep the
//! dataflow of the original program.
//!
//! The checker tracks symbolic values through the allocated program.
//! Every register byte is labelled with the set of original values
//! (a temporary before renaming, plus the byte of it) it is known to
//! hold. An instruction defining temporary `%t` labels the bytes it
//! writes with `%t` and removes `%t` from every other byte, since
//! those copies are now stale. A parallel copy moves labels along
//! with the bytes. The labels are precise but partial: a byte may hold
//! a value without the checker knowing it, but never the other way
//! round.
//!
//! ## Formal Definition
//!
//! The lattice value of a register byte is a set of names, ordered by
//! inclusion, with the meet being intersection. A block's entry state
//! is the meet over its predecessors, taken separately for the two
//! kinds of values: names of linear values (sgprs and linear vgprs)
//! meet over the linear predecessors, all other vgpr names over the
//! logical predecessors. Phis act on the edge from each predecessor
//! as a parallel copy from the operand's register to the definition's.
//!
//! After finding the fixpoint, every operand is checked: its register
//! must hold the name of the operand's original temporary at every
//! byte.

use crate::ir::{Instruction, Opcode, Program};
use crate::moves::ParallelMoves;
use crate::{Block, FxHashMap, FxHashSet, Output, PhysReg, RegType, Temp};
use smallvec::SmallVec;
use std::fmt;

/// A set of errors detected by the checker.
#[derive(Clone, Debug)]
pub struct CheckerErrors {
    errors: Vec<CheckerError>,
}

impl CheckerErrors {
    pub fn errors(&self) -> &[CheckerError] {
        &self.errors
    }
}

impl fmt::Display for CheckerErrors {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, error) in self.errors.iter().enumerate() {
            if i != 0 {
                writeln!(f)?;
            }
            write!(f, "{}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for CheckerErrors {}

/// A single error detected by the checker. `instr` indexes the
/// block's instruction list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckerError {
    /// An operand or definition of a temporary has no register.
    MissingRegister {
        block: Block,
        instr: usize,
        temp: Temp,
    },
    /// A temporary sits in a register of the wrong file, or runs past
    /// the end of its file.
    RegisterOutOfFile {
        block: Block,
        instr: usize,
        temp: Temp,
        reg: PhysReg,
    },
    /// An operand's register doesn't hold the operand's value.
    ValueNotPresent {
        block: Block,
        instr: usize,
        temp: Temp,
        reg: PhysReg,
        actual: Vec<ByteName>,
    },
    /// Two definitions of one instruction write the same byte.
    OverlappingDefs {
        block: Block,
        instr: usize,
        reg: PhysReg,
    },
}

impl fmt::Display for CheckerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CheckerError::MissingRegister { block, instr, temp } => write!(
                f,
                "block{} instr {}: {:?} has no register",
                block.index(),
                instr,
                temp
            ),
            CheckerError::RegisterOutOfFile {
                block,
                instr,
                temp,
                reg,
            } => write!(
                f,
                "block{} instr {}: {:?} placed at {} outside its register file",
                block.index(),
                instr,
                temp,
                reg
            ),
            CheckerError::ValueNotPresent {
                block,
                instr,
                temp,
                reg,
                actual,
            } => write!(
                f,
                "block{} instr {}: {:?} expected in {}, which holds {:?}",
                block.index(),
                instr,
                temp,
                reg,
                actual
            ),
            CheckerError::OverlappingDefs { block, instr, reg } => write!(
                f,
                "block{} instr {}: two definitions write {}",
                block.index(),
                instr,
                reg
            ),
        }
    }
}

/// Byte `byte` of the original temporary with id `temp`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteName {
    pub temp: u32,
    pub byte: u8,
}

/// Abstract state of one register byte: the names it is known to
/// hold.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct CheckerValue {
    names: FxHashSet<ByteName>,
}

impl CheckerValue {
    fn from_name(name: ByteName) -> CheckerValue {
        CheckerValue {
            names: std::iter::once(name).collect(),
        }
    }

    fn sorted(&self) -> Vec<ByteName> {
        let mut names: Vec<ByteName> = self.names.iter().copied().collect();
        names.sort();
        names
    }
}

/// State that steps through program points as we scan over the
/// instruction stream. Bytes without an entry hold nothing known.
#[derive(Clone, Debug, PartialEq, Eq)]
struct CheckerState {
    top: bool,
    bytes: FxHashMap<PhysReg, CheckerValue>,
}

impl CheckerState {
    fn top() -> CheckerState {
        CheckerState {
            top: true,
            bytes: FxHashMap::default(),
        }
    }

    fn empty() -> CheckerState {
        CheckerState {
            top: false,
            bytes: FxHashMap::default(),
        }
    }

    /// Merge this checker state with another at a CFG join-point.
    fn meet_with(&mut self, other: &CheckerState) {
        if other.top {
            return;
        }
        if self.top {
            *self = other.clone();
            return;
        }
        self.bytes.retain(|reg, value| match other.bytes.get(reg) {
            Some(other_value) => {
                value.names.retain(|name| other_value.names.contains(name));
                !value.names.is_empty()
            }
            None => false,
        });
    }

    fn retain_names(&mut self, keep: impl Fn(&ByteName) -> bool) {
        self.bytes.retain(|_, value| {
            value.names.retain(|name| keep(name));
            !value.names.is_empty()
        });
    }

    fn union_with(&mut self, other: &CheckerState) {
        for (&reg, value) in &other.bytes {
            self.bytes
                .entry(reg)
                .or_default()
                .names
                .extend(value.names.iter().copied());
        }
    }

    fn get(&self, reg: PhysReg) -> CheckerValue {
        self.bytes.get(&reg).cloned().unwrap_or_default()
    }

    fn set(&mut self, reg: PhysReg, value: CheckerValue) {
        if value.names.is_empty() {
            self.bytes.remove(&reg);
        } else {
            self.bytes.insert(reg, value);
        }
    }

    fn clobber(&mut self, reg: PhysReg, bytes: u32) {
        for b in 0..bytes {
            self.bytes.remove(&reg.advance(b as i32));
        }
    }

    /// Drops every label of `temp`: a new value of it is being defined.
    fn remove_temp(&mut self, temp: u32) {
        self.retain_names(|name| name.temp != temp);
    }

    fn define(&mut self, temp: u32, reg: PhysReg, bytes: u32) {
        for b in 0..bytes {
            let name = ByteName {
                temp,
                byte: b as u8,
            };
            self.bytes
                .insert(reg.advance(b as i32), CheckerValue::from_name(name));
        }
    }
}

/// Whether `temp` placed at `reg` stays inside its register file.
fn in_file(temp: Temp, reg: PhysReg) -> bool {
    let end = reg.reg_b() + temp.bytes();
    match temp.reg_type() {
        RegType::Vgpr => reg.reg_type() == RegType::Vgpr && end <= PhysReg::END.reg_b(),
        RegType::Sgpr => reg == PhysReg::SCC || end <= PhysReg::new(128).reg_b(),
    }
}

/// The first byte written by two definitions of `instr`, if any.
fn overlapping_defs(instr: &Instruction) -> Option<PhysReg> {
    let defs: SmallVec<[(u32, u32); 4]> = instr
        .definitions
        .iter()
        .filter(|def| def.is_fixed())
        .map(|def| (def.phys_reg().reg_b(), def.phys_reg().reg_b() + def.bytes()))
        .collect();
    for (i, &(lo, hi)) in defs.iter().enumerate() {
        for &(other_lo, other_hi) in &defs[i + 1..] {
            if lo < other_hi && other_lo < hi {
                return Some(PhysReg::from_bytes(lo.max(other_lo)));
            }
        }
    }
    None
}

#[derive(Debug)]
pub struct Checker<'a> {
    program: &'a Program,
    output: &'a Output,
    /// Original temporaries whose values flow along the logical CFG.
    logical_names: FxHashSet<u32>,
    bb_in: Vec<CheckerState>,
    bb_out: Vec<CheckerState>,
}

impl<'a> Checker<'a> {
    /// Create a new checker for an allocated program and the output
    /// of the allocation that produced it.
    pub fn new(program: &'a Program, output: &'a Output) -> Checker<'a> {
        let num_blocks = program.blocks.len();
        let mut logical_names: FxHashSet<u32> = (1..program.temp_rc.len() as u32)
            .filter(|&id| !program.temp_rc[id as usize].is_linear())
            .collect();
        // A logical phi makes its result follow the logical CFG, even
        // for a scalar result.
        for bb in &program.blocks {
            for instr in bb.instructions.iter().take_while(|i| i.is_phi()) {
                if instr.opcode == Opcode::PPhi && instr.definitions[0].is_temp() {
                    let orig = output.original(instr.definitions[0].get_temp());
                    logical_names.insert(orig.id());
                }
            }
        }
        Checker {
            program,
            output,
            logical_names,
            bb_in: vec![CheckerState::top(); num_blocks],
            bb_out: vec![CheckerState::top(); num_blocks],
        }
    }

    fn orig(&self, temp: Temp) -> u32 {
        self.output.original(temp).id()
    }

    fn is_logical(&self, temp: u32) -> bool {
        self.logical_names.contains(&temp)
    }

    /// The state flowing from `pred` into `block`, after the phis of
    /// `block` have read their operands on that edge.
    fn edge_state(&self, pred: Block, block: Block) -> CheckerState {
        let mut state = self.bb_out[pred.index()].clone();
        if state.top {
            return state;
        }

        let bb = self.program.block(block);
        let mut writes: SmallVec<[(u32, bool, PhysReg, Vec<CheckerValue>); 4]> = SmallVec::new();
        for phi in bb.instructions.iter().take_while(|i| i.is_phi()) {
            let def = phi.definitions[0];
            if !def.is_temp() || !def.is_fixed() {
                continue;
            }
            for (j, &p) in bb.phi_preds(phi).iter().enumerate() {
                if p != pred {
                    continue;
                }
                let Some(op) = phi.operands.get(j) else {
                    continue;
                };
                let moved = op.is_temp() && op.is_fixed();
                let srcs: Vec<CheckerValue> = (0..def.bytes())
                    .map(|b| {
                        if moved {
                            state.get(op.phys_reg().advance(b as i32))
                        } else {
                            CheckerValue::default()
                        }
                    })
                    .collect();
                let orig = self.orig(def.get_temp());
                let same_value = op.is_temp() && self.orig(op.get_temp()) == orig;
                writes.push((orig, same_value, def.phys_reg(), srcs));
            }
        }

        for &(orig, same_value, _, _) in &writes {
            if !same_value {
                state.remove_temp(orig);
            }
        }
        for (orig, _, reg, srcs) in writes {
            for (b, mut value) in srcs.into_iter().enumerate() {
                value.names.insert(ByteName {
                    temp: orig,
                    byte: b as u8,
                });
                state.set(reg.advance(b as i32), value);
            }
        }
        state
    }

    /// Meet over the predecessors, per kind of value.
    fn block_in(&self, block: Block) -> CheckerState {
        if block.index() == 0 {
            return CheckerState::empty();
        }
        let bb = self.program.block(block);

        let mut linear = CheckerState::top();
        for &pred in &bb.linear_preds {
            linear.meet_with(&self.edge_state(pred, block));
        }
        let mut logical = CheckerState::top();
        for &pred in &bb.logical_preds {
            logical.meet_with(&self.edge_state(pred, block));
        }
        if linear.top && logical.top {
            return CheckerState::top();
        }

        let mut state = CheckerState::empty();
        if !linear.top {
            linear.retain_names(|name| !self.is_logical(name.temp));
            state.union_with(&linear);
        }
        if !logical.top {
            logical.retain_names(|name| self.is_logical(name.temp));
            state.union_with(&logical);
        }
        state
    }

    /// Update according to instruction.
    fn update(&self, state: &mut CheckerState, instr: &Instruction) {
        if instr.opcode == Opcode::PParallelcopy && overlapping_defs(instr).is_none() {
            self.update_parallelcopy(state, instr);
            return;
        }

        for def in instr.definitions.iter().filter(|def| def.is_fixed()) {
            state.clobber(def.phys_reg(), def.bytes());
        }
        for def in instr.definitions.iter().filter(|def| def.is_temp()) {
            state.remove_temp(self.orig(def.get_temp()));
        }
        for def in instr.definitions.iter() {
            if def.is_temp() && def.is_fixed() {
                state.define(self.orig(def.get_temp()), def.phys_reg(), def.bytes());
            }
        }
    }

    /// Performs the copies in sequence, the way they will be lowered,
    /// then labels the destinations.
    fn update_parallelcopy(&self, state: &mut CheckerState, instr: &Instruction) {
        let scratch = PhysReg::END;
        let mut parallel_moves = ParallelMoves::new();
        for (op, def) in instr.operands.iter().zip(instr.definitions.iter()) {
            if op.is_temp() && op.is_fixed() && def.is_fixed() {
                parallel_moves.add(op.phys_reg(), def.phys_reg(), def.bytes(), ());
            }
        }
        let (unit, moves) = parallel_moves.resolve();
        for (src, dst, ()) in moves.with_scratch(scratch) {
            for b in 0..unit.bytes() as i32 {
                let value = state.get(src.advance(b));
                state.set(dst.advance(b), value);
            }
        }
        state.clobber(scratch, 4);
        if instr.pseudo.needs_scratch_reg {
            state.clobber(instr.pseudo.scratch_sgpr, 4);
        }

        for (op, def) in instr.operands.iter().zip(instr.definitions.iter()) {
            if !def.is_temp() || !def.is_fixed() {
                continue;
            }
            let orig = self.orig(def.get_temp());
            let moved = op.is_temp() && op.is_fixed();
            if moved && self.orig(op.get_temp()) == orig {
                continue;
            }
            state.remove_temp(orig);
            if !moved {
                state.define(orig, def.phys_reg(), def.bytes());
            }
        }
        for def in instr.definitions.iter() {
            if !def.is_temp() || !def.is_fixed() {
                continue;
            }
            let orig = self.orig(def.get_temp());
            for b in 0..def.bytes() {
                let reg = def.phys_reg().advance(b as i32);
                let mut value = state.get(reg);
                value.names.insert(ByteName {
                    temp: orig,
                    byte: b as u8,
                });
                state.set(reg, value);
            }
        }
    }

    fn check_reg(
        &self,
        block: Block,
        instr: usize,
        temp: Temp,
        fixed: bool,
        reg: PhysReg,
        errors: &mut Vec<CheckerError>,
    ) -> bool {
        if !fixed {
            errors.push(CheckerError::MissingRegister { block, instr, temp });
            return false;
        }
        if !in_file(temp, reg) {
            errors.push(CheckerError::RegisterOutOfFile {
                block,
                instr,
                temp,
                reg,
            });
            return false;
        }
        true
    }

    fn check_value(
        &self,
        state: &CheckerState,
        block: Block,
        instr: usize,
        temp: Temp,
        reg: PhysReg,
        errors: &mut Vec<CheckerError>,
    ) {
        let orig = self.orig(temp);
        for b in 0..temp.bytes() {
            let value = state.get(reg.advance(b as i32));
            let name = ByteName {
                temp: orig,
                byte: b as u8,
            };
            if !value.names.contains(&name) {
                trace!(
                    "checker: {:?} not in {} at block{} instr {}",
                    name,
                    reg.advance(b as i32),
                    block.index(),
                    instr
                );
                errors.push(CheckerError::ValueNotPresent {
                    block,
                    instr,
                    temp,
                    reg,
                    actual: value.sorted(),
                });
                return;
            }
        }
    }

    /// Check an instruction against the state right before it.
    fn check(
        &self,
        state: &CheckerState,
        block: Block,
        idx: usize,
        instr: &Instruction,
        errors: &mut Vec<CheckerError>,
    ) {
        for op in instr.operands.iter().filter(|op| op.is_temp()) {
            let temp = op.get_temp();
            if self.check_reg(block, idx, temp, op.is_fixed(), op.phys_reg(), errors) {
                self.check_value(state, block, idx, temp, op.phys_reg(), errors);
            }
        }
        for def in instr.definitions.iter().filter(|def| def.is_temp()) {
            self.check_reg(
                block,
                idx,
                def.get_temp(),
                def.is_fixed(),
                def.phys_reg(),
                errors,
            );
        }
        if let Some(reg) = overlapping_defs(instr) {
            errors.push(CheckerError::OverlappingDefs {
                block,
                instr: idx,
                reg,
            });
        }
    }

    /// Perform the dataflow analysis to compute checker state at each
    /// block entry.
    fn analyze(&mut self) {
        let mut changed = true;
        let mut rounds = 0;
        while changed {
            changed = false;
            rounds += 1;
            for b in 0..self.program.blocks.len() {
                let block = Block::new(b);
                let mut state = self.block_in(block);
                if !state.top {
                    for instr in self.program.blocks[b]
                        .instructions
                        .iter()
                        .skip_while(|i| i.is_phi())
                    {
                        self.update(&mut state, instr);
                    }
                }
                if state != self.bb_out[b] {
                    self.bb_out[b] = state;
                    changed = true;
                }
            }
        }
        for b in 0..self.program.blocks.len() {
            self.bb_in[b] = self.block_in(Block::new(b));
        }
        trace!("checker: fixpoint after {} rounds", rounds);
    }

    /// Using the block-entry states computed by `analyze()`, step
    /// through each block and check every instruction's registers.
    fn find_errors(&self) -> Result<(), CheckerErrors> {
        let mut errors = vec![];
        for (b, input) in self.bb_in.iter().enumerate() {
            let block = Block::new(b);
            if input.top {
                trace!("checker: block{} is unreachable", b);
                continue;
            }
            let bb = self.program.block(block);
            let mut state = input.clone();
            for (idx, instr) in bb.instructions.iter().enumerate() {
                if instr.is_phi() {
                    self.check_phi(block, idx, instr, &mut errors);
                    continue;
                }
                self.check(&state, block, idx, instr, &mut errors);
                self.update(&mut state, instr);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CheckerErrors { errors })
        }
    }

    /// A phi reads each operand at the end of the matching
    /// predecessor.
    fn check_phi(&self, block: Block, idx: usize, phi: &Instruction, errors: &mut Vec<CheckerError>) {
        let def = phi.definitions[0];
        if def.is_temp() {
            self.check_reg(block, idx, def.get_temp(), def.is_fixed(), def.phys_reg(), errors);
        }
        let preds = self.program.block(block).phi_preds(phi);
        for (op, &pred) in phi.operands.iter().zip(preds.iter()) {
            if !op.is_temp() {
                continue;
            }
            let temp = op.get_temp();
            if !self.check_reg(block, idx, temp, op.is_fixed(), op.phys_reg(), errors) {
                continue;
            }
            let pred_out = &self.bb_out[pred.index()];
            if !pred_out.top {
                self.check_value(pred_out, block, idx, temp, op.phys_reg(), errors);
            }
        }
    }

    /// Find any errors, returning `Err(CheckerErrors)` with all errors
    /// found or `Ok(())` otherwise.
    pub fn run(mut self) -> Result<(), CheckerErrors> {
        self.analyze();
        let result = self.find_errors();

        if trace_enabled!() {
            trace!("=== CHECKER RESULT ===");
            for (b, state) in self.bb_in.iter().enumerate() {
                let mut entries: Vec<(PhysReg, Vec<ByteName>)> = state
                    .bytes
                    .iter()
                    .map(|(&reg, value)| (reg, value.sorted()))
                    .collect();
                entries.sort();
                trace!("block{}: {:?}", b, entries);
            }
        }

        result
    }
}

/// Checks an allocated program against the output of its allocation.
pub fn check(program: &Program, output: &Output) -> Result<(), CheckerErrors> {
    Checker::new(program, output).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BlockKind, GfxLevel, Operand};
    use crate::{Definition, RegClass, RegallocOptions};

    fn vdef(t: Temp, reg: u32) -> Definition {
        Definition::fixed(t, PhysReg::vgpr(reg))
    }

    fn vop(t: Temp, reg: u32) -> Operand {
        Operand::fixed(t, PhysReg::vgpr(reg))
    }

    fn mov(def: Definition) -> Instruction {
        Instruction::new(Opcode::VMovB32, &[Operand::c32(0)], &[def])
    }

    fn single_block() -> (Program, Block) {
        let mut program = Program::new(GfxLevel::Gfx10_3);
        let b0 = program.add_block(BlockKind::TOP_LEVEL);
        (program, b0)
    }

    #[test]
    fn values_in_place_pass() {
        let (mut program, b0) = single_block();
        let a = program.allocate_tmp(RegClass::V1);
        let b = program.allocate_tmp(RegClass::V1);
        program.push(b0, mov(vdef(a, 0)));
        program.push(b0, Instruction::new(Opcode::VAddF32, &[vop(a, 0), vop(a, 0)], &[vdef(b, 1)]));
        program.push(b0, Instruction::new(Opcode::Exp, &[vop(b, 1)], &[]));
        assert!(check(&program, &Output::default()).is_ok());
    }

    #[test]
    fn clobbered_value_is_reported() {
        let (mut program, b0) = single_block();
        let a = program.allocate_tmp(RegClass::V1);
        let b = program.allocate_tmp(RegClass::V1);
        program.push(b0, mov(vdef(a, 0)));
        program.push(b0, mov(vdef(b, 0)));
        program.push(b0, Instruction::new(Opcode::Exp, &[vop(a, 0)], &[]));
        let errors = check(&program, &Output::default()).unwrap_err();
        assert_eq!(errors.errors().len(), 1);
        match &errors.errors()[0] {
            CheckerError::ValueNotPresent { temp, instr, actual, .. } => {
                assert_eq!(*temp, a);
                assert_eq!(*instr, 2);
                assert_eq!(actual[0].temp, b.id());
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn missing_and_misplaced_registers() {
        let (mut program, b0) = single_block();
        let a = program.allocate_tmp(RegClass::V1);
        let s = program.allocate_tmp(RegClass::S1);
        program.push(b0, Instruction::new(Opcode::VMovB32, &[Operand::c32(0)], &[Definition::new(a)]));
        program.push(b0, Instruction::new(Opcode::SMovB32, &[Operand::c32(0)], &[vdef(s, 3)]));
        let errors = check(&program, &Output::default()).unwrap_err();
        assert!(matches!(
            errors.errors()[0],
            CheckerError::MissingRegister { temp, .. } if temp == a
        ));
        assert!(matches!(
            errors.errors()[1],
            CheckerError::RegisterOutOfFile { temp, .. } if temp == s
        ));
    }

    #[test]
    fn overlapping_definitions() {
        let (mut program, b0) = single_block();
        let a = program.allocate_tmp(RegClass::V2);
        let b = program.allocate_tmp(RegClass::V1);
        let c = program.allocate_tmp(RegClass::V2);
        program.push(b0, Instruction::new(Opcode::PCreateVector, &[Operand::c32(0), Operand::c32(0)], &[vdef(a, 0)]));
        program.push(
            b0,
            Instruction::new(Opcode::PSplitVector, &[vop(c, 0)], &[vdef(b, 0), vdef(b, 0)]),
        );
        let errors = check(&program, &Output::default()).unwrap_err();
        assert!(errors
            .errors()
            .iter()
            .any(|e| matches!(e, CheckerError::OverlappingDefs { reg, .. } if *reg == PhysReg::vgpr(0))));
    }

    #[test]
    fn parallel_swap_keeps_values() {
        let (mut program, b0) = single_block();
        let a = program.allocate_tmp(RegClass::V1);
        let b = program.allocate_tmp(RegClass::V1);
        let a2 = program.allocate_tmp(RegClass::V1);
        let b2 = program.allocate_tmp(RegClass::V1);
        program.push(b0, mov(vdef(a, 0)));
        program.push(b0, mov(vdef(b, 1)));
        program.push(
            b0,
            Instruction::new(Opcode::PParallelcopy, &[vop(a, 0), vop(b, 1)], &[vdef(a2, 1), vdef(b2, 0)]),
        );
        program.push(b0, Instruction::new(Opcode::Exp, &[vop(a2, 1), vop(b2, 0)], &[]));

        let mut output = Output::default();
        output.orig_names.insert(a2.id(), a);
        output.orig_names.insert(b2.id(), b);
        assert!(check(&program, &output).is_ok());

        // Reading the old register of `a` after the swap is an error.
        program.push(b0, Instruction::new(Opcode::Exp, &[vop(a, 0)], &[]));
        assert!(check(&program, &output).is_err());
    }

    #[test]
    fn phi_reads_operands_on_edges() {
        let mut program = Program::new(GfxLevel::Gfx10_3);
        let entry = program.add_block(BlockKind::TOP_LEVEL | BlockKind::BRANCH);
        let left = program.add_block(BlockKind::NONE);
        let right = program.add_block(BlockKind::NONE);
        let merge = program.add_block(BlockKind::TOP_LEVEL | BlockKind::MERGE);
        program.add_edge(entry, left);
        program.add_edge(entry, right);
        program.add_edge(left, merge);
        program.add_edge(right, merge);

        let p = program.allocate_tmp(RegClass::V1);
        let q = program.allocate_tmp(RegClass::V1);
        let r = program.allocate_tmp(RegClass::V1);
        program.push(left, mov(vdef(p, 0)));
        program.push(right, mov(vdef(q, 2)));
        program.push(merge, Instruction::new(Opcode::PPhi, &[vop(p, 0), vop(q, 2)], &[vdef(r, 0)]));
        program.push(merge, Instruction::new(Opcode::Exp, &[vop(r, 0)], &[]));
        assert!(check(&program, &Output::default()).is_ok());

        // The right-hand operand claims the wrong register.
        program.blocks[merge.index()].instructions[0].operands[1] = vop(q, 3);
        let errors = check(&program, &Output::default()).unwrap_err();
        assert!(matches!(
            errors.errors()[0],
            CheckerError::ValueNotPresent { temp, block, .. } if temp == q && block == merge
        ));
    }

    #[test]
    fn allocated_program_passes() {
        let (mut program, b0) = single_block();
        let a = program.allocate_tmp(RegClass::V1);
        let b = program.allocate_tmp(RegClass::V1);
        let c = program.allocate_tmp(RegClass::V1);
        let s = program.allocate_tmp(RegClass::S1);
        program.push(b0, Instruction::new(Opcode::VMovB32, &[Operand::c32(1)], &[Definition::new(a)]));
        program.push(b0, Instruction::new(Opcode::SMovB32, &[Operand::c32(2)], &[Definition::new(s)]));
        program.push(b0, Instruction::new(Opcode::VAddF32, &[Operand::temp(s), Operand::temp(a)], &[Definition::new(b)]));
        program.push(b0, Instruction::new(Opcode::VMulF32, &[Operand::temp(a), Operand::temp(b)], &[Definition::new(c)]));
        program.push(b0, Instruction::new(Opcode::Exp, &[Operand::temp(c)], &[]));
        crate::liveness::compute(&mut program);

        let output = crate::run(&mut program, &RegallocOptions::default()).unwrap();
        if let Err(errors) = check(&program, &output) {
            panic!("{}\n{}", errors, program);
        }
    }
}
