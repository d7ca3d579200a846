/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Per-generation register legality tables and the wave-count
//! arithmetic that turns register demand into a register budget.

use crate::ir::{Format, GfxLevel, Instruction, Opcode, Program, RegisterDemand};
use crate::RegType;

/// Scalar registers allocated on top of the addressable ones for
/// `vcc`, flat scratch or the xnack mask.
pub fn extra_sgprs(program: &Program) -> u16 {
    let needs_flat_scr =
        program.config.scratch_bytes_per_wave != 0 && program.gfx_level == GfxLevel::Gfx9;
    if program.gfx_level >= GfxLevel::Gfx10 {
        0
    } else if program.gfx_level >= GfxLevel::Gfx8 {
        if needs_flat_scr {
            6
        } else if program.dev.xnack_enabled {
            4
        } else if program.needs_vcc {
            2
        } else {
            0
        }
    } else if needs_flat_scr {
        4
    } else if program.needs_vcc {
        2
    } else {
        0
    }
}

fn align_npot(value: u16, granule: u16) -> u16 {
    (value + granule - 1) / granule * granule
}

/// Number of sgprs actually allocated for `addressable` usable ones.
pub fn sgpr_alloc(program: &Program, addressable: u16) -> u16 {
    let sgprs = addressable + extra_sgprs(program);
    let granule = program.dev.sgpr_alloc_granule;
    align_npot(sgprs.max(granule), granule)
}

/// Number of vgprs actually allocated for `addressable` usable ones.
pub fn vgpr_alloc(program: &Program, addressable: u16) -> u16 {
    debug_assert!(addressable <= program.dev.vgpr_limit);
    let granule = program.dev.vgpr_alloc_granule;
    align_npot(addressable.max(granule), granule)
}

pub fn addressable_sgprs_for_waves(program: &Program, waves: u16) -> u16 {
    let granule = program.dev.sgpr_alloc_granule;
    let sgprs = (program.dev.physical_sgprs / waves.max(1)).min(128);
    let sgprs = sgprs / granule * granule;
    sgprs
        .saturating_sub(extra_sgprs(program))
        .min(program.dev.sgpr_limit)
}

pub fn addressable_vgprs_for_waves(program: &Program, waves: u16) -> u16 {
    let granule = program.dev.vgpr_alloc_granule;
    let vgprs = program.dev.physical_vgprs / waves.max(1) / granule * granule;
    vgprs
        .saturating_sub(program.config.num_shared_vgprs / 2)
        .min(program.dev.vgpr_limit)
}

/// The hard ceiling: the registers addressable at the program's
/// minimum wave count.
pub fn hard_limit(program: &Program) -> RegisterDemand {
    RegisterDemand::new(
        addressable_vgprs_for_waves(program, program.min_waves),
        addressable_sgprs_for_waves(program, program.min_waves),
    )
}

/// Recomputes the wave count for `demand` and sets the program's
/// register budget to everything addressable at that wave count.
pub fn update_vgpr_sgpr_demand(program: &mut Program, demand: RegisterDemand) {
    let limit = hard_limit(program);
    if demand.exceeds(limit) {
        program.num_waves = 0;
        program.max_reg_demand = demand;
        return;
    }

    let mut waves = program.dev.physical_sgprs / sgpr_alloc(program, demand.sgpr);
    let vgpr_demand = vgpr_alloc(program, demand.vgpr) + program.config.num_shared_vgprs / 2;
    waves = waves.min(program.dev.physical_vgprs / vgpr_demand);
    waves = waves.min(program.dev.max_waves_per_simd).max(1);
    program.num_waves = waves;
    program.max_reg_demand = RegisterDemand::new(
        addressable_vgprs_for_waves(program, waves),
        addressable_sgprs_for_waves(program, waves),
    );
}

/// Whether the opsel bit of operand `idx` (or of the definition, for
/// `idx == -1`) can select the high half of a register.
pub fn can_use_opsel(gfx_level: GfxLevel, opcode: Opcode, idx: i32) -> bool {
    if gfx_level < GfxLevel::Gfx9 {
        return false;
    }
    match opcode {
        Opcode::VMadF16 | Opcode::VFmaF16 | Opcode::VMadLegacyF16 => true,
        Opcode::VPackB32F16 => idx != -1,
        Opcode::VAddF16 | Opcode::VMulF16 | Opcode::VFmacF16 => gfx_level >= GfxLevel::Gfx11,
        Opcode::VCvtF16F32 => gfx_level >= GfxLevel::Gfx11 && idx == -1,
        _ => false,
    }
}

/// Whether writing the result preserves the other half of the
/// destination register.
pub fn instr_is_16bit(gfx_level: GfxLevel, opcode: Opcode) -> bool {
    if gfx_level < GfxLevel::Gfx9 {
        return false;
    }
    match opcode {
        Opcode::VMadF16
        | Opcode::VFmaF16
        | Opcode::VInterpP2F16
        | Opcode::VFmaMixloF16
        | Opcode::VFmaMixhiF16
        | Opcode::VMacF16 => true,
        Opcode::VAddF16 | Opcode::VMulF16 | Opcode::VFmacF16 | Opcode::VCvtF16F32 => {
            gfx_level >= GfxLevel::Gfx10
        }
        _ => can_use_opsel(gfx_level, opcode, -1),
    }
}

/// Whether the instruction can be converted to SDWA to address a
/// sub-dword part of its registers. `pre_ra` relaxes the check on the
/// number of definitions, since a carry-out may still end up in vcc.
pub fn can_use_sdwa(gfx_level: GfxLevel, instr: &Instruction, pre_ra: bool) -> bool {
    if !instr.is_valu() {
        return false;
    }
    if gfx_level < GfxLevel::Gfx8 || gfx_level >= GfxLevel::Gfx11 {
        return false;
    }
    if instr.is_dpp16() || instr.is_vop3p() {
        return false;
    }
    if instr.is_sdwa() {
        return true;
    }

    if instr.is_vop3() {
        // Native VOP3 opcodes have no SDWA form.
        if !instr.format.contains(Format::VOP1)
            && !instr.format.contains(Format::VOP2)
            && !instr.format.contains(Format::VOPC)
        {
            return false;
        }
        if instr.valu.clamp && instr.is_vopc() && gfx_level != GfxLevel::Gfx8 {
            return false;
        }
        if instr.valu.omod != 0 && gfx_level < GfxLevel::Gfx9 {
            return false;
        }
        if !pre_ra && instr.definitions.len() >= 2 {
            return false;
        }
        for op in instr.operands.iter().skip(1) {
            if op.is_literal() {
                return false;
            }
            if gfx_level < GfxLevel::Gfx9 && !op.is_of_type(RegType::Vgpr) {
                return false;
            }
        }
    }

    if let Some(def) = instr.definitions.first() {
        if def.bytes() > 4 && !instr.is_vopc() {
            return false;
        }
    }
    if let Some(op) = instr.operands.first() {
        if op.is_literal() {
            return false;
        }
        if gfx_level < GfxLevel::Gfx9 && !op.is_of_type(RegType::Vgpr) {
            return false;
        }
        if op.bytes() > 4 {
            return false;
        }
        if instr.operands.len() > 1 && instr.operands[1].bytes() > 4 {
            return false;
        }
    }

    let is_mac = matches!(
        instr.opcode,
        Opcode::VMacF32 | Opcode::VMacF16 | Opcode::VFmacF32 | Opcode::VFmacF16
    );
    if gfx_level != GfxLevel::Gfx8 && is_mac {
        return false;
    }

    !matches!(
        instr.opcode,
        Opcode::VReadfirstlaneB32 | Opcode::VWritelaneB32 | Opcode::VWritelaneB32E64
    )
}

/// Re-encodes a VOP1/VOP2/VOPC instruction as SDWA. Byte selects are
/// derived from the operand and definition registers at emission.
pub fn convert_to_sdwa(instr: &mut Instruction) {
    if instr.is_sdwa() {
        return;
    }
    instr.format = instr.format.without_vop3() | Format::SDWA;
}

/// Whether the instruction can write `m0` as its definition.
pub fn can_write_m0(instr: &Instruction) -> bool {
    if instr.is_salu() {
        return true;
    }
    if instr.is_valu() {
        return false;
    }
    // The copy-like pseudo instructions are lowered to SALU when
    // writing m0.
    matches!(
        instr.opcode,
        Opcode::PParallelcopy | Opcode::PExtractVector | Opcode::PSplitVector | Opcode::PCreateVector
    )
}

/// The operand that has to be allocated to the same register as the
/// definition, for accumulator and SOPK forms.
pub fn op_fixed_to_def(instr: &Instruction) -> Option<usize> {
    match instr.opcode {
        Opcode::VMacF32
        | Opcode::VMacF16
        | Opcode::VMacLegacyF32
        | Opcode::VFmacF32
        | Opcode::VFmacF16
        | Opcode::VFmacLegacyF32
        | Opcode::VPkFmacF16
        | Opcode::VWritelaneB32
        | Opcode::VWritelaneB32E64
        | Opcode::VDot4cI32I8 => Some(2),
        Opcode::SAddkI32 | Opcode::SMulkI32 | Opcode::SCmovkI32 => Some(0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Definition, Operand};
    use crate::{RegClass, Temp};

    #[test]
    fn budget_from_demand() {
        let mut program = Program::new(GfxLevel::Gfx9);
        update_vgpr_sgpr_demand(&mut program, RegisterDemand::new(20, 10));
        assert_eq!(program.num_waves, 10);
        assert_eq!(program.max_reg_demand.vgpr, 24);
        assert!(program.max_reg_demand.sgpr >= 10);

        // More demand never shrinks the budget.
        let before = program.max_reg_demand;
        update_vgpr_sgpr_demand(&mut program, RegisterDemand::new(before.vgpr + 1, before.sgpr));
        assert!(program.max_reg_demand.vgpr > before.vgpr);
        assert!(program.max_reg_demand.sgpr <= before.sgpr);
        assert!(program.max_reg_demand.vgpr <= program.dev.vgpr_limit);
    }

    #[test]
    fn demand_over_limit() {
        let mut program = Program::new(GfxLevel::Gfx9);
        update_vgpr_sgpr_demand(&mut program, RegisterDemand::new(300, 10));
        assert_eq!(program.num_waves, 0);
        assert_eq!(program.max_reg_demand.vgpr, 300);
    }

    #[test]
    fn allocation_granules() {
        let program = Program::new(GfxLevel::Gfx9);
        assert_eq!(vgpr_alloc(&program, 1), 4);
        assert_eq!(vgpr_alloc(&program, 5), 8);
        assert_eq!(sgpr_alloc(&program, 17), 32);
    }

    #[test]
    fn sdwa_legality() {
        let v = |id| Operand::temp(Temp::new(id, RegClass::V1));
        let def = Definition::new(Temp::new(9, RegClass::V1));
        let add = Instruction::new(Opcode::VAddF32, &[v(1), v(2)], &[def]);
        assert!(can_use_sdwa(GfxLevel::Gfx9, &add, false));
        assert!(!can_use_sdwa(GfxLevel::Gfx11, &add, false));
        assert!(!can_use_sdwa(GfxLevel::Gfx7, &add, false));

        let mad = Instruction::new(Opcode::VMadF32, &[v(1), v(2), v(3)], &[def]);
        assert!(!can_use_sdwa(GfxLevel::Gfx9, &mad, false));

        let lit = Instruction::new(Opcode::VAddF32, &[Operand::literal32(7), v(2)], &[def]);
        assert!(!can_use_sdwa(GfxLevel::Gfx9, &lit, false));

        let mut converted = add.clone();
        convert_to_sdwa(&mut converted);
        assert!(converted.is_sdwa() && converted.is_vop2());
    }

    #[test]
    fn opsel_tables() {
        assert!(can_use_opsel(GfxLevel::Gfx9, Opcode::VMadF16, -1));
        assert!(!can_use_opsel(GfxLevel::Gfx8, Opcode::VMadF16, 0));
        assert!(!can_use_opsel(GfxLevel::Gfx9, Opcode::VPackB32F16, -1));
        assert!(instr_is_16bit(GfxLevel::Gfx10, Opcode::VAddF16));
        assert!(!instr_is_16bit(GfxLevel::Gfx9, Opcode::VAddF16));
    }
}
