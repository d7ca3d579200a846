/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Encoding changes that depend on the registers chosen.
//!
//! Some three-address instructions have a shorter two-address form when
//! the destination can share a register with an operand. The opposite
//! happens to compares and carry instructions whose short form
//! implicitly writes `vcc`: if the result landed elsewhere they need the
//! long encoding.

use super::Env;
use crate::ir::{Definition, Format, GfxLevel, Instruction, Opcode, Operand};
use crate::regfile::RegisterFile;
use crate::{PhysReg, RegClass, RegType};

/// Whether an SALU instruction with a 16-bit literal can use the SOPK
/// encoding, where the destination is also the first source.
pub(crate) fn sop2_can_use_sopk(instr: &Instruction) -> bool {
    use Opcode::*;
    if !matches!(instr.opcode, SAddI32 | SAddU32 | SMulI32 | SCselectB32) {
        return false;
    }
    if instr.operands.len() < 2 {
        return false;
    }
    // SOPK has no carry out.
    if instr.opcode == SAddU32 && !instr.definitions.get(1).map_or(true, |d| d.is_kill()) {
        return false;
    }

    let literal_idx = (instr.opcode != SCselectB32 && instr.operands[1].is_literal()) as usize;
    let other = &instr.operands[1 - literal_idx];
    if !other.is_temp() || !other.is_kill_before_def() {
        return false;
    }
    let literal = &instr.operands[literal_idx];
    if !literal.is_literal() {
        return false;
    }

    // Has to survive sign extension from 16 bits.
    const I16_MASK: u32 = 0xffff_8000;
    let value = literal.constant_value();
    value & I16_MASK == 0 || value & I16_MASK == I16_MASK
}

impl<'a> Env<'a> {
    /// Whether a VOP3 multiply-add can become the VOP2 accumulator form,
    /// which requires the addend and the destination to share a
    /// register.
    pub(crate) fn vop3_can_use_vop2acc(&self, instr: &Instruction) -> bool {
        use Opcode::*;
        if !instr.is_vop3() && !instr.is_vop3p() {
            return false;
        }
        match instr.opcode {
            VMadF32 | VMadF16 | VMadLegacyF16 => {}
            VFmaF32 | VPkFmaF16 | VFmaF16 | VDot4I32I8 => {
                if self.gfx_level < GfxLevel::Gfx10 {
                    return false;
                }
            }
            VMadLegacyF32 => {
                if !self.dev.has_mac_legacy32 {
                    return false;
                }
            }
            VFmaLegacyF32 => {
                if !self.dev.has_fmac_legacy32 {
                    return false;
                }
            }
            _ => return false,
        }
        if instr.operands.len() < 3 {
            return false;
        }

        let ops = &instr.operands;
        if !ops[2].is_of_type(RegType::Vgpr)
            || !ops[2].is_kill_before_def()
            || (!ops[0].is_of_type(RegType::Vgpr) && !ops[1].is_of_type(RegType::Vgpr))
        {
            return false;
        }

        let valu = &instr.valu;
        if instr.is_vop3p() {
            for (i, op) in ops.iter().enumerate().take(3) {
                if op.is_literal() {
                    continue;
                }
                if valu.opsel_lo & (1 << i) != 0 {
                    return false;
                }
                // Inline constants of the packed accumulator form are
                // replicated to the high half from gfx11 on.
                let hi = valu.opsel_hi & (1 << i) != 0;
                if hi == (op.is_constant() && self.gfx_level >= GfxLevel::Gfx11) {
                    return false;
                }
            }
        } else {
            let opsel_mask: u8 = if self.gfx_level < GfxLevel::Gfx11 { 0xf } else { !0x3 };
            if valu.opsel & opsel_mask != 0 {
                return false;
            }
            for (i, op) in ops.iter().enumerate().take(2) {
                if !op.is_of_type(RegType::Vgpr) && valu.opsel & (1 << i) != 0 {
                    return false;
                }
            }
        }

        let im_mask: u8 = if instr.is_dpp16() && instr.is_vop3() { 0x3 } else { 0 };
        valu.omod == 0 && !valu.clamp && valu.abs & !im_mask == 0 && valu.neg & !im_mask == 0
    }

    /// The affinity of the definition points somewhere other than `reg`
    /// and that place is free, so tying the definition to `reg` would
    /// cost a copy later.
    fn affinity_prefers_elsewhere(
        &self,
        reg_file: &RegisterFile,
        instr: &Instruction,
        reg: PhysReg,
        bytes: u32,
    ) -> bool {
        match self.assigned_affinity(instr.definitions[0].temp_id()) {
            Some(affinity) => affinity.reg != reg && !reg_file.test(affinity.reg, bytes),
            None => false,
        }
    }

    fn optimize_encoding_vop2(&mut self, reg_file: &RegisterFile, instr: &mut Instruction) {
        if !self.vop3_can_use_vop2acc(instr) {
            return;
        }
        let first = if self.gfx_level < GfxLevel::Gfx11 { 0 } else { 2 };
        if instr.operands[first..3].iter().any(|op| op.phys_reg().byte() != 0) {
            return;
        }
        let acc = instr.operands[2];
        if self.affinity_prefers_elsewhere(reg_file, instr, acc.phys_reg(), acc.bytes()) {
            return;
        }

        if !instr.operands[1].is_of_type(RegType::Vgpr) {
            instr.swap_valu_operands(0, 1);
        }

        if instr.is_vop3p() && instr.operands[0].is_literal() {
            let literal = instr.operands[0].constant_value();
            let lo_shift = (instr.valu.opsel_lo & 1) as u32 * 16;
            let hi_shift = (instr.valu.opsel_hi & 1) as u32 * 16;
            let lo = (literal >> lo_shift) & 0xffff;
            let hi = (literal >> hi_shift) & 0xffff;
            instr.operands[0] = Operand::literal32(lo | (hi << 16));
        }

        instr.format = instr.format.without_vop3().without_vop3p() | Format::VOP2;
        instr.valu.opsel_lo = 0;
        instr.valu.opsel_hi = 0;
        let from = instr.opcode;
        instr.opcode = match from {
            Opcode::VMadF32 => Opcode::VMacF32,
            Opcode::VFmaF32 => Opcode::VFmacF32,
            Opcode::VMadF16 | Opcode::VMadLegacyF16 => Opcode::VMacF16,
            Opcode::VFmaF16 => Opcode::VFmacF16,
            Opcode::VPkFmaF16 => Opcode::VPkFmacF16,
            Opcode::VDot4I32I8 => Opcode::VDot4cI32I8,
            Opcode::VMadLegacyF32 => Opcode::VMacLegacyF32,
            Opcode::VFmaLegacyF32 => Opcode::VFmacLegacyF32,
            other => other,
        };
        self.stats.encoding_fixups += 1;
        trace!("    {} -> {}", from, instr.opcode);
    }

    fn optimize_encoding_sopk(&mut self, reg_file: &RegisterFile, instr: &mut Instruction) {
        if !sop2_can_use_sopk(instr) {
            return;
        }
        let literal_idx = instr.operands[1].is_literal() as usize;
        let src = instr.operands[1 - literal_idx];
        if src.phys_reg().reg() >= 128 {
            return;
        }
        if self.affinity_prefers_elsewhere(reg_file, instr, src.phys_reg(), src.bytes()) {
            return;
        }

        instr.format = Format::SOPK;
        instr.salu_imm = (instr.operands[literal_idx].constant_value() & 0xffff) as u16;
        if literal_idx == 0 {
            instr.operands.swap(0, 1);
        }
        if instr.operands.len() > 2 {
            instr.operands.swap(1, 2);
        }
        instr.operands.pop();

        let from = instr.opcode;
        instr.opcode = match from {
            Opcode::SAddU32 | Opcode::SAddI32 => Opcode::SAddkI32,
            Opcode::SMulI32 => Opcode::SMulkI32,
            _ => Opcode::SCmovkI32,
        };
        self.stats.encoding_fixups += 1;
        trace!("    {} -> {}", from, instr.opcode);
    }

    /// Switches `instr` to a shorter encoding where its operand
    /// registers allow it.
    pub(crate) fn optimize_encoding(&mut self, reg_file: &RegisterFile, instr: &mut Instruction) {
        if instr.is_valu() {
            self.optimize_encoding_vop2(reg_file, instr);
        }
        if instr.is_salu() {
            self.optimize_encoding_sopk(reg_file, instr);
        }
    }

    /// Promotes `instr` to VOP3 if its short encoding would require
    /// `vcc` where something else was chosen. Before gfx10 VOP3 can't
    /// take a literal, so one is first copied into the sgpr pair of the
    /// definition, which the instruction may read and write.
    pub(crate) fn fix_vcc_encoding(&mut self, instr: &mut Instruction, instructions: &mut Vec<Instruction>) {
        use Opcode::*;
        if instr.is_vop3() {
            return;
        }
        let not_vcc = |reg: Option<PhysReg>| reg.map_or(false, |reg| reg != PhysReg::VCC);
        let def_reg = |i: usize| instr.definitions.get(i).map(|d| d.phys_reg());
        let op_reg = |i: usize| instr.operands.get(i).map(|op| op.phys_reg());

        let needs_vop3 = (instr.format.without_dpp() == Format::VOPC && not_vcc(def_reg(0)))
            || (instr.opcode == VCndmaskB32 && not_vcc(op_reg(2)))
            || (matches!(
                instr.opcode,
                VAddCoU32 | VAddcCoU32 | VSubCoU32 | VSubbCoU32 | VSubrevCoU32 | VSubbrevCoU32
            ) && not_vcc(def_reg(1)))
            || (matches!(instr.opcode, VAddcCoU32 | VSubbCoU32 | VSubbrevCoU32)
                && not_vcc(op_reg(2)));
        if !needs_vop3 {
            return;
        }

        if instr.operands.first().map_or(false, |op| op.is_literal())
            && self.gfx_level < GfxLevel::Gfx10
        {
            let def = if instr.is_vopc() {
                instr.definitions[0]
            } else {
                instr.definitions[instr.definitions.len() - 1]
            };
            debug_assert_eq!(def.reg_class(), RegClass::S2);
            let rc = if instr.operands[0].size() == 2 {
                RegClass::S2
            } else {
                RegClass::S1
            };
            let tmp = self.allocate_temp(def.phys_reg(), rc);

            let mut src = instr.operands[0];
            if src.bytes() < 4 {
                src = Operand::c32(src.constant_value());
            }
            let copy = Instruction::new(
                Opcode::PParallelcopy,
                &[src],
                &[Definition::fixed(tmp, def.phys_reg())],
            );
            trace!("    {}", copy);
            instructions.push(copy);

            let mut op = Operand::fixed(tmp, def.phys_reg());
            op.set_first_kill(true);
            instr.operands[0] = op;
        }

        instr.format = instr.format.as_vop3();
        self.stats.encoding_fixups += 1;
    }
}
