/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Arbitrary structured programs.
//!
//! The generator lays out control flow the way the compiler does:
//! a sequence of top-level regions, each a divergent if (with an
//! invert block that only exists on the linear CFG), a uniform if, or
//! a loop with a single latch. Values are only used where they are
//! available, so every generated program is in valid SSA form; the
//! liveness information the allocator needs is computed at the end.

use crate::ir::{BlockKind, GfxLevel, Instruction, Opcode, Operand, Program};
use crate::{liveness, Block, Definition, PhysReg, RegClass, Temp};
use libfuzzer_sys::arbitrary::{Arbitrary, Result as ArbitraryResult, Unstructured};

#[derive(Clone, Copy, Debug)]
pub struct Options {
    pub control_flow: bool,
    pub subdword: bool,
    pub fixed_regs: bool,
    pub max_regions: usize,
    pub max_instrs_per_block: usize,
}

impl std::default::Default for Options {
    fn default() -> Self {
        Options {
            control_flow: true,
            subdword: true,
            fixed_regs: true,
            max_regions: 6,
            max_instrs_per_block: 10,
        }
    }
}

/// Values usable at some point of the program being generated.
#[derive(Clone, Debug, Default)]
struct Scope {
    values: Vec<Temp>,
}

impl Scope {
    fn pick(&self, u: &mut Unstructured, rc: RegClass) -> ArbitraryResult<Option<Temp>> {
        let candidates: Vec<Temp> = self
            .values
            .iter()
            .copied()
            .filter(|t| t.reg_class() == rc)
            .collect();
        if candidates.is_empty() {
            return Ok(None);
        }
        Ok(Some(*u.choose(&candidates)?))
    }

    /// Values defined since `base` was taken that follow the linear
    /// CFG.
    fn linear_since(&self, base: &Scope) -> Vec<Temp> {
        self.values[base.values.len()..]
            .iter()
            .copied()
            .filter(|t| t.is_linear())
            .collect()
    }
}

struct ProgramBuilder<'o> {
    program: Program,
    opts: &'o Options,
}

impl<'o> ProgramBuilder<'o> {
    fn push(&mut self, block: Block, instr: Instruction) {
        self.program.push(block, instr);
    }

    /// A value of class `rc` available in `scope`, defining a new one
    /// from a constant if there is none.
    fn get_or_define(
        &mut self,
        u: &mut Unstructured,
        block: Block,
        scope: &mut Scope,
        rc: RegClass,
    ) -> ArbitraryResult<Temp> {
        if let Some(temp) = scope.pick(u, rc)? {
            return Ok(temp);
        }
        let temp = self.program.allocate_tmp(rc);
        let value = Operand::c32(u.int_in_range(0..=64)?);
        let def = [Definition::new(temp)];
        let instr = match rc {
            RegClass::S1 => Instruction::new(Opcode::SMovB32, &[value], &def),
            RegClass::V2 => Instruction::new(Opcode::PCreateVector, &[value, value], &def),
            RegClass::V2B => Instruction::new(Opcode::VCvtF16F32, &[value], &def),
            _ => Instruction::new(Opcode::VMovB32, &[value], &def),
        };
        self.push(block, instr);
        scope.values.push(temp);
        Ok(temp)
    }

    fn vgpr(
        &mut self,
        u: &mut Unstructured,
        block: Block,
        scope: &mut Scope,
    ) -> ArbitraryResult<Operand> {
        Ok(Operand::temp(self.get_or_define(u, block, scope, RegClass::V1)?))
    }

    /// A source that a VALU instruction can read from any file.
    fn any_source(
        &mut self,
        u: &mut Unstructured,
        block: Block,
        scope: &mut Scope,
    ) -> ArbitraryResult<Operand> {
        Ok(match u.int_in_range(0..=2)? {
            0 => Operand::c32(u.int_in_range(0..=64)?),
            1 => Operand::temp(self.get_or_define(u, block, scope, RegClass::S1)?),
            _ => self.vgpr(u, block, scope)?,
        })
    }

    fn define(&mut self, scope: &mut Scope, rc: RegClass) -> Temp {
        let temp = self.program.allocate_tmp(rc);
        scope.values.push(temp);
        temp
    }

    fn gen_instr(
        &mut self,
        u: &mut Unstructured,
        block: Block,
        scope: &mut Scope,
    ) -> ArbitraryResult<()> {
        let def = Definition::new;
        let instr = match u.int_in_range(0..=12)? {
            0 => {
                let src = self.any_source(u, block, scope)?;
                let dst = self.define(scope, RegClass::V1);
                Instruction::new(Opcode::VMovB32, &[src], &[def(dst)])
            }
            1 => {
                let a = self.any_source(u, block, scope)?;
                let b = self.vgpr(u, block, scope)?;
                let dst = self.define(scope, RegClass::V1);
                Instruction::new(Opcode::VAddF32, &[a, b], &[def(dst)])
            }
            2 => {
                let a = self.vgpr(u, block, scope)?;
                let b = self.vgpr(u, block, scope)?;
                let c = self.vgpr(u, block, scope)?;
                let dst = self.define(scope, RegClass::V1);
                Instruction::new(Opcode::VMadF32, &[a, b, c], &[def(dst)])
            }
            3 => {
                let src = match scope.pick(u, RegClass::S1)? {
                    Some(temp) if bool::arbitrary(u)? => Operand::temp(temp),
                    _ => Operand::c32(u.int_in_range(0..=64)?),
                };
                let dst = self.define(scope, RegClass::S1);
                Instruction::new(Opcode::SMovB32, &[src], &[def(dst)])
            }
            4 => {
                let a = Operand::temp(self.get_or_define(u, block, scope, RegClass::S1)?);
                let b = match scope.pick(u, RegClass::S1)? {
                    Some(temp) if bool::arbitrary(u)? => Operand::temp(temp),
                    _ => Operand::c32(u.int_in_range(0..=64)?),
                };
                let dst = self.define(scope, RegClass::S1);
                Instruction::new(
                    Opcode::SAddI32,
                    &[a, b],
                    &[def(dst), Definition::physical(PhysReg::SCC, RegClass::S1)],
                )
            }
            5 => {
                let a = self.vgpr(u, block, scope)?;
                let b = self.vgpr(u, block, scope)?;
                let dst = self.define(scope, RegClass::S2);
                Instruction::new(Opcode::VCmpLtF32, &[a, b], &[def(dst)])
            }
            6 => {
                let a = self.vgpr(u, block, scope)?;
                let b = self.vgpr(u, block, scope)?;
                let dst = self.define(scope, RegClass::V2);
                Instruction::new(Opcode::PCreateVector, &[a, b], &[def(dst)])
            }
            7 => {
                let vec = Operand::temp(self.get_or_define(u, block, scope, RegClass::V2)?);
                let lo = self.define(scope, RegClass::V1);
                let hi = self.define(scope, RegClass::V1);
                Instruction::new(Opcode::PSplitVector, &[vec], &[def(lo), def(hi)])
            }
            8 => {
                let mut ops = vec![];
                for _ in 0..u.int_in_range(1..=4)? {
                    ops.push(self.vgpr(u, block, scope)?);
                }
                Instruction::new(Opcode::Exp, &ops, &[])
            }
            9 if self.opts.fixed_regs => {
                let msg = self.get_or_define(u, block, scope, RegClass::S1)?;
                Instruction::new(Opcode::SSendmsg, &[Operand::fixed(msg, PhysReg::M0)], &[])
            }
            10 if self.opts.subdword => {
                let src = self.vgpr(u, block, scope)?;
                let dst = self.define(scope, RegClass::V2B);
                Instruction::new(Opcode::VCvtF16F32, &[src], &[def(dst)])
            }
            11 if self.opts.subdword => {
                let a = Operand::temp(self.get_or_define(u, block, scope, RegClass::V2B)?);
                let b = Operand::temp(self.get_or_define(u, block, scope, RegClass::V2B)?);
                let dst = self.define(scope, RegClass::V2B);
                Instruction::new(Opcode::VAddF16, &[a, b], &[def(dst)])
            }
            _ => {
                let addr = Operand::temp(self.get_or_define(u, block, scope, RegClass::V2)?);
                let dst = self.define(scope, RegClass::V1);
                Instruction::new(Opcode::GlobalLoadDword, &[addr], &[def(dst)])
            }
        };
        self.push(block, instr);
        Ok(())
    }

    fn fill_block(
        &mut self,
        u: &mut Unstructured,
        block: Block,
        scope: &mut Scope,
    ) -> ArbitraryResult<()> {
        for _ in 0..u.int_in_range(0..=self.opts.max_instrs_per_block)? {
            self.gen_instr(u, block, scope)?;
        }
        Ok(())
    }

    fn branch(&mut self, block: Block) {
        self.push(block, Instruction::new(Opcode::PBranch, &[], &[]));
    }

    /// Phis at the top of `merge` joining values from two sides.
    fn merge_phis(
        &mut self,
        u: &mut Unstructured,
        merge: Block,
        left: &Scope,
        right: &Scope,
        scope: &mut Scope,
        classes: &[(Opcode, RegClass)],
    ) -> ArbitraryResult<()> {
        for _ in 0..u.int_in_range(0..=3)? {
            let &(opcode, rc) = u.choose(classes)?;
            let (Some(a), Some(b)) = (left.pick(u, rc)?, right.pick(u, rc)?) else {
                continue;
            };
            let dst = self.define(scope, rc);
            self.push(
                merge,
                Instruction::new(opcode, &[Operand::temp(a), Operand::temp(b)], &[Definition::new(dst)]),
            );
        }
        Ok(())
    }

    /// A divergent if/else. Both sides run one after the other on the
    /// linear CFG, so scalars defined on the then-side stay visible.
    fn divergent_if(
        &mut self,
        u: &mut Unstructured,
        current: Block,
        scope: &mut Scope,
    ) -> ArbitraryResult<Block> {
        self.program.block_mut(current).kind |= BlockKind::BRANCH;
        self.branch(current);
        let then = self.program.add_block(BlockKind::NONE);
        let invert = self.program.add_block(BlockKind::INVERT);
        let els = self.program.add_block(BlockKind::NONE);
        let merge = self.program.add_block(BlockKind::TOP_LEVEL | BlockKind::MERGE);
        self.program.add_edge(current, then);
        self.program.add_linear_edge(then, invert);
        self.program.add_linear_edge(invert, els);
        self.program.add_logical_edge(current, els);
        self.program.add_logical_edge(then, merge);
        self.program.add_edge(els, merge);

        let mut then_scope = scope.clone();
        self.fill_block(u, then, &mut then_scope)?;
        let mut else_scope = scope.clone();
        else_scope.values.extend(then_scope.linear_since(scope));
        self.fill_block(u, els, &mut else_scope)?;
        for block in [then, invert, els] {
            self.branch(block);
        }

        let mut merge_scope = else_scope.clone();
        merge_scope.values.retain(|t| t.is_linear() || scope.values.contains(t));
        self.merge_phis(
            u,
            merge,
            &then_scope,
            &else_scope,
            &mut merge_scope,
            &[(Opcode::PPhi, RegClass::V1), (Opcode::PPhi, RegClass::V2)],
        )?;
        *scope = merge_scope;
        self.fill_block(u, merge, scope)?;
        Ok(merge)
    }

    /// An if/else on a uniform condition: an ordinary diamond.
    fn uniform_if(
        &mut self,
        u: &mut Unstructured,
        current: Block,
        scope: &mut Scope,
    ) -> ArbitraryResult<Block> {
        self.program.block_mut(current).kind |= BlockKind::BRANCH | BlockKind::UNIFORM;
        self.branch(current);
        let then = self.program.add_block(BlockKind::UNIFORM);
        let els = self.program.add_block(BlockKind::UNIFORM);
        let merge = self.program.add_block(BlockKind::TOP_LEVEL | BlockKind::MERGE);
        self.program.add_edge(current, then);
        self.program.add_edge(current, els);
        self.program.add_edge(then, merge);
        self.program.add_edge(els, merge);

        let mut then_scope = scope.clone();
        self.fill_block(u, then, &mut then_scope)?;
        let mut else_scope = scope.clone();
        self.fill_block(u, els, &mut else_scope)?;
        self.branch(then);
        self.branch(els);

        let mut merge_scope = scope.clone();
        self.merge_phis(
            u,
            merge,
            &then_scope,
            &else_scope,
            &mut merge_scope,
            &[(Opcode::PPhi, RegClass::V1), (Opcode::PLinearPhi, RegClass::S1)],
        )?;
        *scope = merge_scope;
        self.fill_block(u, merge, scope)?;
        Ok(merge)
    }

    /// A loop with one header, one latch and one exit, carrying a
    /// vector accumulator and a scalar counter around the back edge.
    fn simple_loop(
        &mut self,
        u: &mut Unstructured,
        current: Block,
        scope: &mut Scope,
    ) -> ArbitraryResult<Block> {
        let init_v = self.get_or_define(u, current, scope, RegClass::V1)?;
        let init_s = self.get_or_define(u, current, scope, RegClass::S1)?;
        self.program.block_mut(current).kind |= BlockKind::LOOP_PREHEADER;
        self.branch(current);

        let header = self.program.add_block(BlockKind::LOOP_HEADER);
        let latch = self.program.add_block(BlockKind::CONTINUE);
        let exit = self.program.add_block(BlockKind::TOP_LEVEL | BlockKind::LOOP_EXIT);
        self.program.block_mut(header).loop_nest_depth = 1;
        self.program.block_mut(latch).loop_nest_depth = 1;
        self.program.add_edge(current, header);
        self.program.add_edge(header, latch);
        self.program.add_edge(latch, header);
        self.program.add_edge(header, exit);

        let mut header_scope = scope.clone();
        let acc = self.define(&mut header_scope, RegClass::V1);
        let counter = self.define(&mut header_scope, RegClass::S1);
        let next_acc = self.program.allocate_tmp(RegClass::V1);
        let next_counter = self.program.allocate_tmp(RegClass::S1);
        self.push(
            header,
            Instruction::new(
                Opcode::PPhi,
                &[Operand::temp(init_v), Operand::temp(next_acc)],
                &[Definition::new(acc)],
            ),
        );
        self.push(
            header,
            Instruction::new(
                Opcode::PLinearPhi,
                &[Operand::temp(init_s), Operand::temp(next_counter)],
                &[Definition::new(counter)],
            ),
        );
        self.fill_block(u, header, &mut header_scope)?;
        self.branch(header);

        let mut latch_scope = header_scope.clone();
        self.fill_block(u, latch, &mut latch_scope)?;
        let step = self.vgpr(u, latch, &mut latch_scope)?;
        self.push(
            latch,
            Instruction::new(
                Opcode::VAddF32,
                &[Operand::temp(acc), step],
                &[Definition::new(next_acc)],
            ),
        );
        self.push(
            latch,
            Instruction::new(
                Opcode::SAddI32,
                &[Operand::temp(counter), Operand::c32(1)],
                &[
                    Definition::new(next_counter),
                    Definition::physical(PhysReg::SCC, RegClass::S1),
                ],
            ),
        );
        self.branch(latch);

        *scope = header_scope;
        self.fill_block(u, exit, scope)?;
        Ok(exit)
    }
}

/// Generates a program with liveness computed, ready for allocation.
pub fn arbitrary_program_with_options(
    u: &mut Unstructured,
    opts: &Options,
) -> ArbitraryResult<Program> {
    let gfx_level = *u.choose(&[
        GfxLevel::Gfx8,
        GfxLevel::Gfx9,
        GfxLevel::Gfx10,
        GfxLevel::Gfx10_3,
        GfxLevel::Gfx11,
    ])?;
    let mut builder = ProgramBuilder {
        program: Program::new(gfx_level),
        opts,
    };

    let entry = builder.program.add_block(BlockKind::TOP_LEVEL);
    let mut scope = Scope::default();
    builder.fill_block(u, entry, &mut scope)?;

    let mut current = entry;
    if opts.control_flow {
        for _ in 0..u.int_in_range(0..=opts.max_regions)? {
            current = match u.int_in_range(0..=2)? {
                0 => builder.divergent_if(u, current, &mut scope)?,
                1 => builder.uniform_if(u, current, &mut scope)?,
                _ => builder.simple_loop(u, current, &mut scope)?,
            };
        }
    }

    // Keep a few values alive until the end.
    let mut outputs = vec![];
    for _ in 0..u.int_in_range(0..=3)? {
        if let Some(temp) = scope.pick(u, RegClass::V1)? {
            outputs.push(Operand::temp(temp));
        }
    }
    if !outputs.is_empty() {
        builder.push(current, Instruction::new(Opcode::Exp, &outputs, &[]));
    }
    builder.push(current, Instruction::new(Opcode::SEndpgm, &[], &[]));

    let mut program = builder.program;
    liveness::compute(&mut program);
    Ok(program)
}

impl<'a> Arbitrary<'a> for Program {
    fn arbitrary(u: &mut Unstructured<'a>) -> ArbitraryResult<Program> {
        arbitrary_program_with_options(u, &Options::default())
    }
}
