/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Placement constraints: where a value of a given class may live
//! when it is read or written by a given instruction, and how the
//! instruction has to be re-encoded once a sub-dword value lands at a
//! non-zero byte offset.

use crate::ir::{DeviceInfo, Format, GfxLevel, Instruction, Opcode};
use crate::regfile::PhysRegInterval;
use crate::target::{can_use_opsel, can_use_sdwa, convert_to_sdwa, instr_is_16bit};
use crate::{PhysReg, RegClass, RegType};

/// The current usable windows of both register files. The linear
/// vgprs occupy the top `num_linear_vgprs` slots of the vgpr budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Budget {
    pub sgpr_bounds: u16,
    pub vgpr_bounds: u16,
    pub num_linear_vgprs: u16,
}

impl Budget {
    pub fn bounds(&self, ty: RegType, linear_vgpr: bool) -> PhysRegInterval {
        let linear_start = (self.vgpr_bounds - self.num_linear_vgprs) as u32;
        match ty {
            RegType::Vgpr if linear_vgpr => PhysRegInterval::new(
                PhysReg::vgpr(0).plus_slots(linear_start),
                self.num_linear_vgprs as u32,
            ),
            RegType::Vgpr => PhysRegInterval::new(PhysReg::vgpr(0), linear_start),
            RegType::Sgpr => PhysRegInterval::new(PhysReg::sgpr(0), self.sgpr_bounds as u32),
        }
    }

    #[inline(always)]
    pub fn bounds_for(&self, rc: RegClass) -> PhysRegInterval {
        self.bounds(rc.reg_type(), rc.is_linear_vgpr())
    }
}

/// Minimum alignment in slots of a full-dword class.
pub(crate) fn get_stride(rc: RegClass) -> u32 {
    match rc.reg_type() {
        RegType::Vgpr => 1,
        RegType::Sgpr => match rc.size() {
            2 => 2,
            s if s >= 4 => 4,
            _ => 1,
        },
    }
}

/// Placement constraints of one allocation request.
#[derive(Clone, Copy, Debug)]
pub(crate) struct DefInfo {
    pub bounds: PhysRegInterval,
    pub size: u32,
    /// In slots, or in bytes for sub-dword classes.
    pub stride: u32,
    /// In bytes. Can be finer than the stride when the high half of a
    /// slot can be written without preserving the low half.
    pub data_stride: u32,
    /// The class to place, which may be widened from the request.
    pub rc: RegClass,
}

impl DefInfo {
    /// Constraints for operand `operand` of `instr`, or for its
    /// definition when `operand` is `None`.
    pub fn new(
        gfx_level: GfxLevel,
        dev: &DeviceInfo,
        budget: &Budget,
        instr: &Instruction,
        rc: RegClass,
        operand: Option<usize>,
    ) -> Self {
        let mut info = DefInfo {
            bounds: budget.bounds_for(rc),
            size: rc.size(),
            stride: get_stride(rc),
            data_stride: 0,
            rc,
        };

        if rc.is_subdword() {
            match operand {
                Some(idx) => info.stride = subdword_operand_stride(gfx_level, instr, idx, rc),
                None => info.subdword_definition_info(gfx_level, dev, instr),
            }
        } else if instr.is_mimg() && instr.mimg.d16 && gfx_level <= GfxLevel::Gfx9 {
            // GFX9 image instructions with D16 data and a partial dmask
            // compute their register use as a full dword per component,
            // so the last registers of the file must stay unused.
            let gather4_d16_bug = operand.is_none() && rc == RegClass::V2 && instr.mimg.dmask != 0xf;
            if gather4_d16_bug {
                let shrink = (rc.bytes() / 4).saturating_sub(budget.num_linear_vgprs as u32);
                info.bounds.size = info.bounds.size.saturating_sub(shrink);
            }
        }

        if info.data_stride == 0 {
            info.data_stride = if info.rc.is_subdword() {
                info.stride
            } else {
                info.stride * 4
            };
        }
        info
    }

    fn subdword_definition_info(&mut self, gfx_level: GfxLevel, dev: &DeviceInfo, instr: &Instruction) {
        debug_assert!(gfx_level >= GfxLevel::Gfx8);
        self.stride = if self.rc.bytes() % 2 == 0 { 2 } else { 1 };

        if instr.is_pseudo() {
            if instr.opcode == Opcode::PInterpGfx11 {
                self.rc = RegClass::new(RegType::Vgpr, self.rc.size());
                self.stride = 1;
            }
            return;
        }

        if instr.is_valu() {
            debug_assert!(self.rc.bytes() <= 2);
            if can_use_sdwa(gfx_level, instr, false) || instr.opcode == Opcode::PVCvtPkU8F32 {
                return;
            }
            self.rc = if instr_is_16bit(gfx_level, instr.opcode) {
                RegClass::V2B
            } else {
                RegClass::V1
            };
            self.stride = if self.rc == RegClass::V2B { 4 } else { 1 };
            if instr.opcode == Opcode::VFmaMixloF16 || can_use_opsel(gfx_level, instr.opcode, -1) {
                self.data_stride = 2;
                if self.rc == RegClass::V2B {
                    self.stride = 2;
                }
            }
            return;
        }

        use Opcode::*;
        match instr.opcode {
            VInterpP2F16 => return,
            DsReadU8D16 | DsReadI8D16 | DsReadU16D16 | FlatLoadUbyteD16 | FlatLoadSbyteD16
            | FlatLoadShortD16 | GlobalLoadUbyteD16 | GlobalLoadSbyteD16 | GlobalLoadShortD16
            | ScratchLoadUbyteD16 | ScratchLoadSbyteD16 | ScratchLoadShortD16
            | BufferLoadUbyteD16 | BufferLoadSbyteD16 | BufferLoadShortD16
            | BufferLoadFormatD16X => {
                debug_assert!(gfx_level >= GfxLevel::Gfx9);
                if dev.sram_ecc_enabled {
                    self.rc = RegClass::V1;
                    self.stride = 1;
                    self.data_stride = 2;
                } else {
                    self.stride = 2;
                }
                return;
            }
            BufferLoadFormatD16Xyz | TbufferLoadFormatD16Xyz => {
                debug_assert!(gfx_level >= GfxLevel::Gfx9);
                if dev.sram_ecc_enabled {
                    self.rc = RegClass::V2;
                    self.stride = 1;
                } else {
                    self.stride = 4;
                }
                return;
            }
            _ => {}
        }

        if instr.is_mimg() && instr.mimg.d16 && !dev.sram_ecc_enabled {
            debug_assert!(gfx_level >= GfxLevel::Gfx9);
            self.stride = 4;
        } else {
            self.rc = RegClass::new(RegType::Vgpr, self.rc.size());
            self.stride = 1;
        }
    }
}

/// Byte alignment a sub-dword operand needs to be readable by operand
/// `idx` of `instr`.
pub(crate) fn subdword_operand_stride(
    gfx_level: GfxLevel,
    instr: &Instruction,
    idx: usize,
    rc: RegClass,
) -> u32 {
    if instr.is_pseudo() {
        // p_as_uniform becomes v_readfirstlane_b32, which has no SDWA.
        return if instr.opcode == Opcode::PAsUniform {
            4
        } else if rc.bytes() % 2 == 0 {
            2
        } else {
            1
        };
    }

    if instr.is_valu() {
        if can_use_sdwa(gfx_level, instr, false) {
            return rc.bytes();
        }
        if can_use_opsel(gfx_level, instr.opcode, idx as i32) {
            return 2;
        }
        if instr.is_vop3p() {
            return 2;
        }
    }

    use Opcode::*;
    match instr.opcode {
        VCvtF32Ubyte0 => 1,
        DsWriteB8 | DsWriteB16 | BufferStoreByte | BufferStoreShort | BufferStoreFormatD16X
        | FlatStoreByte | FlatStoreShort | ScratchStoreByte | ScratchStoreShort
        | GlobalStoreByte | GlobalStoreShort => {
            if gfx_level >= GfxLevel::Gfx9 {
                2
            } else {
                4
            }
        }
        _ => 4,
    }
}

/// Re-encodes `instr` so that operand `idx` reads from byte `byte` of
/// its register.
pub(crate) fn add_subdword_operand(
    gfx_level: GfxLevel,
    instr: &mut Instruction,
    idx: usize,
    byte: u32,
    rc: RegClass,
) {
    if instr.is_pseudo() || byte == 0 {
        return;
    }
    debug_assert!(rc.bytes() <= 2);

    if instr.is_valu() {
        if instr.opcode == Opcode::VCvtF32Ubyte0 {
            instr.opcode = match byte {
                1 => Opcode::VCvtF32Ubyte1,
                2 => Opcode::VCvtF32Ubyte2,
                _ => Opcode::VCvtF32Ubyte3,
            };
            return;
        }
        if can_use_sdwa(gfx_level, instr, false) {
            convert_to_sdwa(instr);
            return;
        }
        if instr.is_vop3p() {
            debug_assert!(byte == 2 && instr.valu.opsel_lo & (1 << idx) == 0);
            instr.valu.opsel_lo |= 1 << idx;
            instr.valu.opsel_hi |= 1 << idx;
            return;
        }
        debug_assert!(can_use_opsel(gfx_level, instr.opcode, idx as i32));
        instr.valu.opsel |= 1 << idx;
        return;
    }

    debug_assert_eq!(byte, 2);
    match instr.opcode.d16_hi() {
        Some(hi) => instr.opcode = hi,
        None => panic!("{} cannot read the high half of a register", instr.opcode),
    }
}

/// Re-encodes `instr` so that its sub-dword definition is written at
/// `reg`.
pub(crate) fn add_subdword_definition(
    gfx_level: GfxLevel,
    instr: &mut Instruction,
    reg: PhysReg,
    allow_16bit_write: bool,
) {
    if instr.is_pseudo() {
        return;
    }

    if instr.is_valu() {
        debug_assert!(instr.definitions[0].bytes() <= 2);
        if instr.opcode == Opcode::PVCvtPkU8F32 {
            return;
        }
        if reg.byte() == 0 && allow_16bit_write && instr_is_16bit(gfx_level, instr.opcode) {
            return;
        }
        if can_use_sdwa(gfx_level, instr, false) {
            convert_to_sdwa(instr);
            return;
        }
        debug_assert!(allow_16bit_write);
        if instr.opcode == Opcode::VFmaMixloF16 {
            instr.opcode = Opcode::VFmaMixhiF16;
            return;
        }
        debug_assert_eq!(reg.byte(), 2);
        debug_assert!(can_use_opsel(gfx_level, instr.opcode, -1));
        instr.valu.opsel |= 1 << 3;
        return;
    }

    if reg.byte() == 0 {
        return;
    }
    match instr.opcode.d16_hi() {
        Some(hi) => instr.opcode = hi,
        None => panic!("{} cannot write the high half of a register", instr.opcode),
    }
}

/// Whether operand `idx` of `instr` can be read from `reg` as is.
pub(crate) fn operand_can_use_reg(
    gfx_level: GfxLevel,
    instr: &Instruction,
    idx: usize,
    reg: PhysReg,
    rc: RegClass,
) -> bool {
    if reg.byte() != 0 {
        let stride = subdword_operand_stride(gfx_level, instr, idx, rc);
        if reg.byte() % stride != 0 {
            return false;
        }
    }

    match instr.format.base() {
        Format::SMEM if !instr.is_valu() => {
            let slot = PhysReg::new(reg.reg());
            slot != PhysReg::SCC
                && slot != PhysReg::EXEC
                // only the offset can be m0
                && (slot != PhysReg::M0 || idx == 1 || idx == 3)
                // sdata can be vcc
                && (slot != PhysReg::VCC
                    || (instr.definitions.is_empty() && idx == 2)
                    || gfx_level >= GfxLevel::Gfx10)
        }
        Format::MUBUF | Format::MTBUF if !instr.is_valu() => {
            idx != 2 || gfx_level < GfxLevel::Gfx12 || PhysReg::new(reg.reg()) != PhysReg::SCC
        }
        _ => true,
    }
}
