/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! The SSA register allocator.
//!
//! Blocks are visited in program order. At the start of each block the
//! register file is rebuilt from the live-in set, repairing SSA with new
//! phis where predecessors disagree on the name of a value. Every
//! definition then gets a register straight away; when nothing fits, live
//! values are moved out of the way with a parallel copy in front of the
//! instruction, and the moved values get fresh names. See `process.rs`
//! for the per-instruction driver.

use crate::info::{Budget, DefInfo};
use crate::ir::{Definition, GfxLevel, Instruction, Opcode, Program};
use crate::target::{
    addressable_sgprs_for_waves, addressable_vgprs_for_waves, hard_limit, sgpr_alloc, vgpr_alloc,
};
use crate::{
    Block, FxHashMap, Output, PhysReg, RaTestPolicy, RegAllocError, RegClass, RegType,
    RegallocOptions, Stats, Temp,
};
use smallvec::SmallVec;
use std::collections::BTreeMap;

pub(crate) mod affinity;
pub(crate) mod bitset;
pub(crate) mod data_structures;
pub(crate) mod encoding;
pub(crate) mod linear;
pub(crate) mod phis;
pub(crate) mod placement;
pub(crate) mod process;
pub(crate) mod renames;
pub(crate) mod search;
pub(crate) mod ssa;

#[cfg(test)]
mod tests;

use bitset::RegSet;
use data_structures::*;

pub(crate) struct Env<'a> {
    pub(crate) program: &'a mut Program,
    pub(crate) gfx_level: GfxLevel,
    pub(crate) dev: crate::ir::DeviceInfo,
    pub(crate) policy: RaTestPolicy,

    /// The block being allocated.
    pub(crate) block: Block,

    /// Indexed by temp id; grows with every temp the allocator creates.
    pub(crate) assignments: Vec<Assignment>,
    /// Per block: original temp id to the name it has at the end of
    /// that block.
    pub(crate) renames: Vec<FxHashMap<u32, Temp>>,
    pub(crate) orig_names: BTreeMap<u32, Temp>,
    /// Headers of the loops enclosing the current block, innermost last.
    pub(crate) loop_header: Vec<Block>,

    pub(crate) vectors: FxHashMap<u32, VectorIdx>,
    pub(crate) vector_store: VectorStore,
    /// Temps consumed by a `p_split_vector`, with that instruction's
    /// definitions.
    pub(crate) split_vectors: FxHashMap<u32, SmallVec<[Definition; 4]>>,

    /// Stand-in instructions for requests not tied to a real one.
    pub(crate) pseudo_dummy: Instruction,
    pub(crate) phi_dummy: Instruction,

    pub(crate) max_used_sgpr: u16,
    pub(crate) max_used_vgpr: u16,
    pub(crate) sgpr_limit: u16,
    pub(crate) vgpr_limit: u16,
    pub(crate) budget: Budget,

    /// Registers read by exports and similar instructions that should
    /// not be reused right away.
    pub(crate) war_hint: RegSet,
    pub(crate) rr_sgpr_it: PhysReg,
    pub(crate) rr_vgpr_it: PhysReg,

    pub(crate) stats: Stats,
}

impl<'a> Env<'a> {
    pub(crate) fn new(program: &'a mut Program, options: &RegallocOptions) -> Self {
        let num_blocks = program.blocks.len();
        let num_temps = program.peek_allocation_id() as usize;
        let sgpr_limit = addressable_sgprs_for_waves(program, program.min_waves);
        let vgpr_limit = addressable_vgprs_for_waves(program, program.min_waves);
        let budget = Budget {
            sgpr_bounds: program.max_reg_demand.sgpr,
            vgpr_bounds: program.max_reg_demand.vgpr,
            num_linear_vgprs: 0,
        };
        Self {
            gfx_level: program.gfx_level,
            dev: program.dev,
            policy: options.policy,
            block: Block::new(0),
            assignments: vec![Assignment::default(); num_temps],
            renames: vec![FxHashMap::default(); num_blocks],
            orig_names: BTreeMap::new(),
            loop_header: Vec::new(),
            vectors: FxHashMap::default(),
            vector_store: VectorStore::with_capacity(0),
            split_vectors: FxHashMap::default(),
            pseudo_dummy: Instruction::new(Opcode::PParallelcopy, &[], &[]),
            phi_dummy: Instruction::new(Opcode::PLinearPhi, &[], &[]),
            max_used_sgpr: 0,
            max_used_vgpr: 0,
            sgpr_limit,
            vgpr_limit,
            budget,
            war_hint: RegSet::new(),
            rr_sgpr_it: PhysReg::sgpr(0),
            rr_vgpr_it: PhysReg::vgpr(0),
            stats: Stats::default(),
            program,
        }
    }

    /// Placement constraints of `rc` for operand `operand` of `instr`,
    /// or for its definition.
    pub(crate) fn def_info(
        &self,
        instr: &Instruction,
        rc: RegClass,
        operand: Option<usize>,
    ) -> DefInfo {
        DefInfo::new(self.gfx_level, &self.dev, &self.budget, instr, rc, operand)
    }

    /// Placement constraints of a plain copy of class `rc`.
    pub(crate) fn copy_info(&self, rc: RegClass) -> DefInfo {
        self.def_info(&self.pseudo_dummy, rc, None)
    }

    /// Creates a temp living at `reg`.
    pub(crate) fn allocate_temp(&mut self, reg: PhysReg, rc: RegClass) -> Temp {
        let temp = self.program.allocate_tmp(rc);
        self.assignments.push(Assignment::new(reg, rc));
        debug_assert_eq!(self.assignments.len(), self.program.peek_allocation_id() as usize);
        temp
    }

    /// Creates a temp that doesn't have a register yet.
    pub(crate) fn allocate_unassigned_temp(&mut self, rc: RegClass) -> Temp {
        let temp = self.program.allocate_tmp(rc);
        self.assignments.push(Assignment::default());
        debug_assert_eq!(self.assignments.len(), self.program.peek_allocation_id() as usize);
        temp
    }

    /// The affinity leader of `id`, if it already has a register.
    pub(crate) fn assigned_affinity(&self, id: u32) -> Option<Assignment> {
        let affinity = self.assignments[id as usize].affinity;
        if affinity == 0 {
            return None;
        }
        let leader = self.assignments[affinity as usize];
        leader.assigned.then_some(leader)
    }

    fn check_limits(&self) -> Result<(), RegAllocError> {
        let limit = hard_limit(self.program);
        let demand = self.program.max_reg_demand;
        if demand.vgpr > limit.vgpr {
            return Err(RegAllocError::TooManyLiveRegs(RegType::Vgpr));
        }
        if demand.sgpr > limit.sgpr {
            return Err(RegAllocError::TooManyLiveRegs(RegType::Sgpr));
        }
        if self.program.live_in.len() != self.program.blocks.len() {
            return Err(RegAllocError::InvalidProgram(
                "live-in sets don't match the blocks",
            ));
        }
        if self.program.temp_rc.is_empty() {
            return Err(RegAllocError::InvalidProgram("missing temp class table"));
        }
        Ok(())
    }

    /// Writes the final register counts back to the program.
    fn finish(self) -> Output {
        let program = self.program;
        program.config.num_vgprs = vgpr_alloc(program, self.max_used_vgpr + 1).min(256);
        program.config.num_sgprs = sgpr_alloc(program, self.max_used_sgpr + 1);
        trace!(
            "used v{} s{}, config v{} s{}",
            self.max_used_vgpr + 1,
            self.max_used_sgpr + 1,
            program.config.num_vgprs,
            program.config.num_sgprs
        );
        Output {
            orig_names: self.orig_names,
            stats: self.stats,
        }
    }
}

pub(crate) fn run(
    program: &mut Program,
    options: &RegallocOptions,
) -> Result<Output, RegAllocError> {
    if options.verbose_log && trace_enabled!() {
        trace!("before register allocation:\n{}", program);
    }

    let mut env = Env::new(program, options);
    env.check_limits()?;
    env.get_affinities();
    env.allocate_blocks()?;
    let output = env.finish();

    if options.verbose_log && trace_enabled!() {
        trace!("after register allocation:\n{}", program);
    }
    trace!("{:?}", output.stats);
    Ok(output)
}
