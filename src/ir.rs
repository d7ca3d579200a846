/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! The program representation the allocator works on: blocks of
//! instructions over SSA temporaries, with operand and definition
//! register slots that allocation fills in.

use crate::{Block, PhysReg, RegClass, RegType, Temp};
use smallvec::SmallVec;
use std::collections::BTreeSet;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GfxLevel {
    Gfx6,
    Gfx7,
    Gfx8,
    Gfx9,
    Gfx10,
    Gfx10_3,
    Gfx11,
    Gfx12,
}

/// Instruction encoding. The low byte is the base encoding; the
/// vector ALU encodings are flag bits above it and may be combined
/// (e.g. `VOPC | VOP3` for a compare promoted to the 64-bit form).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Format(u16);

impl Format {
    pub const PSEUDO: Format = Format(0);
    pub const SOP1: Format = Format(1);
    pub const SOP2: Format = Format(2);
    pub const SOPK: Format = Format(3);
    pub const SOPP: Format = Format(4);
    pub const SOPC: Format = Format(5);
    pub const SMEM: Format = Format(6);
    pub const DS: Format = Format(7);
    pub const MTBUF: Format = Format(8);
    pub const MUBUF: Format = Format(9);
    pub const MIMG: Format = Format(10);
    pub const EXP: Format = Format(11);
    pub const FLAT: Format = Format(12);
    pub const GLOBAL: Format = Format(13);
    pub const SCRATCH: Format = Format(14);
    pub const VINTRP: Format = Format(15);
    pub const VOP1: Format = Format(1 << 8);
    pub const VOP2: Format = Format(1 << 9);
    pub const VOPC: Format = Format(1 << 10);
    pub const VOP3: Format = Format(1 << 11);
    pub const VOP3P: Format = Format(1 << 12);
    pub const SDWA: Format = Format(1 << 13);
    pub const DPP16: Format = Format(1 << 14);

    const BASE_MASK: u16 = 0xff;
    const VALU_MASK: u16 = Self::VOP1.0 | Self::VOP2.0 | Self::VOPC.0 | Self::VOP3.0 | Self::VOP3P.0;

    #[inline(always)]
    pub fn base(self) -> Format {
        Format(self.0 & Self::BASE_MASK)
    }

    #[inline(always)]
    pub fn contains(self, other: Format) -> bool {
        if other.0 & !Self::BASE_MASK == 0 {
            self.base() == other
        } else {
            self.0 & other.0 == other.0
        }
    }

    #[inline(always)]
    pub fn is_valu(self) -> bool {
        self.0 & Self::VALU_MASK != 0
    }

    #[inline(always)]
    pub fn is_salu(self) -> bool {
        !self.is_valu()
            && matches!(
                self.base(),
                Format::SOP1 | Format::SOP2 | Format::SOPK | Format::SOPP | Format::SOPC
            )
    }

    pub fn as_vop3(self) -> Format {
        Format(self.0 | Self::VOP3.0)
    }

    pub fn without_vop3(self) -> Format {
        Format(self.0 & !Self::VOP3.0)
    }

    pub fn without_dpp(self) -> Format {
        Format(self.0 & !Self::DPP16.0)
    }

    pub fn without_vop3p(self) -> Format {
        Format(self.0 & !Self::VOP3P.0)
    }
}

impl std::ops::BitOr for Format {
    type Output = Format;
    fn bitor(self, rhs: Format) -> Format {
        Format(self.0 | rhs.0)
    }
}

impl fmt::Debug for Format {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        const NAMES: [&str; 16] = [
            "PSEUDO", "SOP1", "SOP2", "SOPK", "SOPP", "SOPC", "SMEM", "DS", "MTBUF", "MUBUF",
            "MIMG", "EXP", "FLAT", "GLOBAL", "SCRATCH", "VINTRP",
        ];
        let mut parts: SmallVec<[&str; 4]> = SmallVec::new();
        if self.base().0 != 0 || !self.is_valu() {
            parts.push(NAMES.get(self.base().0 as usize).copied().unwrap_or("?"));
        }
        for (flag, name) in [
            (Format::VOP1, "VOP1"),
            (Format::VOP2, "VOP2"),
            (Format::VOPC, "VOPC"),
            (Format::VOP3, "VOP3"),
            (Format::VOP3P, "VOP3P"),
            (Format::SDWA, "SDWA"),
            (Format::DPP16, "DPP16"),
        ] {
            if self.0 & flag.0 != 0 {
                parts.push(name);
            }
        }
        write!(f, "{}", parts.join("|"))
    }
}

/// Opcodes the allocator knows about. The set is closed: every rule
/// about register placement is an explicit match over it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Opcode {
    // Pseudo instructions.
    PPhi,
    PLinearPhi,
    PParallelcopy,
    PCreateVector,
    PExtractVector,
    PSplitVector,
    PStartLinearVgpr,
    PEndLinearVgpr,
    PAsUniform,
    PBranch,
    PCbranchZ,
    PCbranchNz,
    PLogicalStart,
    PLogicalEnd,
    PInterpGfx11,
    PVCvtPkU8F32,

    // Scalar ALU.
    SMovB32,
    SMovB64,
    SAddI32,
    SAddU32,
    SSubI32,
    SMulI32,
    SCselectB32,
    SAndB32,
    SAndB64,
    SOrB64,
    SAndn2B64,
    SCmpLgU32,
    SAddkI32,
    SMulkI32,
    SCmovkI32,
    SSendmsg,
    SEndpgm,

    // Scalar memory.
    SLoadDword,
    SLoadDwordx2,
    SLoadDwordx4,
    SBufferLoadDword,

    // Vector ALU.
    VMovB32,
    VAddF32,
    VSubF32,
    VMulF32,
    VAddF16,
    VMulF16,
    VLshlrevB32,
    VMadF32,
    VMacF32,
    VFmaF32,
    VFmacF32,
    VMadF16,
    VMadLegacyF16,
    VMacF16,
    VFmaF16,
    VFmacF16,
    VPkFmaF16,
    VPkFmacF16,
    VDot4I32I8,
    VDot4cI32I8,
    VMadLegacyF32,
    VMacLegacyF32,
    VFmaLegacyF32,
    VFmacLegacyF32,
    VFmaMixloF16,
    VFmaMixhiF16,
    VCvtF32Ubyte0,
    VCvtF32Ubyte1,
    VCvtF32Ubyte2,
    VCvtF32Ubyte3,
    VCvtF16F32,
    VPackB32F16,
    VCndmaskB32,
    VAddCoU32,
    VAddcCoU32,
    VSubCoU32,
    VSubbCoU32,
    VSubrevCoU32,
    VSubbrevCoU32,
    VCmpLtF32,
    VCmpEqU32,
    VWritelaneB32,
    VWritelaneB32E64,
    VReadfirstlaneB32,
    VInterpP1F32,
    VInterpP2F16,
    VInterpP2HiF16,

    // LDS.
    DsReadB32,
    DsWriteB32,
    DsWriteB8,
    DsWriteB8D16Hi,
    DsWriteB16,
    DsWriteB16D16Hi,
    DsReadU8D16,
    DsReadU8D16Hi,
    DsReadI8D16,
    DsReadI8D16Hi,
    DsReadU16D16,
    DsReadU16D16Hi,

    // Buffer memory.
    BufferLoadDword,
    BufferStoreDword,
    BufferStoreByte,
    BufferStoreByteD16Hi,
    BufferStoreShort,
    BufferStoreShortD16Hi,
    BufferStoreFormatD16X,
    BufferStoreFormatD16HiX,
    BufferLoadUbyteD16,
    BufferLoadUbyteD16Hi,
    BufferLoadSbyteD16,
    BufferLoadSbyteD16Hi,
    BufferLoadShortD16,
    BufferLoadShortD16Hi,
    BufferLoadFormatD16X,
    BufferLoadFormatD16HiX,
    BufferLoadFormatD16Xyz,
    TbufferLoadFormatD16Xyz,

    // Flat, global and scratch memory.
    FlatLoadUbyteD16,
    FlatLoadUbyteD16Hi,
    FlatLoadSbyteD16,
    FlatLoadSbyteD16Hi,
    FlatLoadShortD16,
    FlatLoadShortD16Hi,
    FlatStoreByte,
    FlatStoreByteD16Hi,
    FlatStoreShort,
    FlatStoreShortD16Hi,
    GlobalLoadDword,
    GlobalStoreDword,
    GlobalLoadUbyteD16,
    GlobalLoadUbyteD16Hi,
    GlobalLoadSbyteD16,
    GlobalLoadSbyteD16Hi,
    GlobalLoadShortD16,
    GlobalLoadShortD16Hi,
    GlobalStoreByte,
    GlobalStoreByteD16Hi,
    GlobalStoreShort,
    GlobalStoreShortD16Hi,
    ScratchLoadUbyteD16,
    ScratchLoadUbyteD16Hi,
    ScratchLoadSbyteD16,
    ScratchLoadSbyteD16Hi,
    ScratchLoadShortD16,
    ScratchLoadShortD16Hi,
    ScratchStoreByte,
    ScratchStoreByteD16Hi,
    ScratchStoreShort,
    ScratchStoreShortD16Hi,

    // Image memory and export.
    ImageSample,
    ImageGather4,
    ImageLoad,
    ImageStore,
    Exp,
}

impl Opcode {
    /// The encoding an instruction with this opcode uses unless it is
    /// explicitly promoted or converted.
    pub fn default_format(self) -> Format {
        use Opcode::*;
        match self {
            PPhi | PLinearPhi | PParallelcopy | PCreateVector | PExtractVector | PSplitVector
            | PStartLinearVgpr | PEndLinearVgpr | PAsUniform | PBranch | PCbranchZ
            | PCbranchNz | PLogicalStart | PLogicalEnd | PInterpGfx11 | PVCvtPkU8F32 => {
                Format::PSEUDO
            }
            SMovB32 | SMovB64 => Format::SOP1,
            SAddI32 | SAddU32 | SSubI32 | SMulI32 | SCselectB32 | SAndB32 | SAndB64 | SOrB64
            | SAndn2B64 => Format::SOP2,
            SCmpLgU32 => Format::SOPC,
            SAddkI32 | SMulkI32 | SCmovkI32 => Format::SOPK,
            SSendmsg | SEndpgm => Format::SOPP,
            SLoadDword | SLoadDwordx2 | SLoadDwordx4 | SBufferLoadDword => Format::SMEM,
            VMovB32 | VCvtF32Ubyte0 | VCvtF32Ubyte1 | VCvtF32Ubyte2 | VCvtF32Ubyte3
            | VCvtF16F32 | VReadfirstlaneB32 => Format::VOP1,
            VAddF32 | VSubF32 | VMulF32 | VAddF16 | VMulF16 | VLshlrevB32 | VMacF32 | VFmacF32
            | VMacF16 | VFmacF16 | VPkFmacF16 | VDot4cI32I8 | VMacLegacyF32 | VFmacLegacyF32
            | VCndmaskB32 | VAddCoU32 | VAddcCoU32 | VSubCoU32 | VSubbCoU32 | VSubrevCoU32
            | VSubbrevCoU32 | VWritelaneB32 => Format::VOP2,
            VMadF32 | VFmaF32 | VMadF16 | VMadLegacyF16 | VFmaF16 | VMadLegacyF32
            | VFmaLegacyF32 | VPackB32F16 | VWritelaneB32E64 => Format::VOP3,
            VPkFmaF16 | VDot4I32I8 | VFmaMixloF16 | VFmaMixhiF16 => Format::VOP3P,
            VCmpLtF32 | VCmpEqU32 => Format::VOPC,
            VInterpP1F32 | VInterpP2F16 | VInterpP2HiF16 => Format::VINTRP,
            DsReadB32 | DsWriteB32 | DsWriteB8 | DsWriteB8D16Hi | DsWriteB16 | DsWriteB16D16Hi
            | DsReadU8D16 | DsReadU8D16Hi | DsReadI8D16 | DsReadI8D16Hi | DsReadU16D16
            | DsReadU16D16Hi => Format::DS,
            TbufferLoadFormatD16Xyz => Format::MTBUF,
            BufferLoadDword | BufferStoreDword | BufferStoreByte | BufferStoreByteD16Hi
            | BufferStoreShort | BufferStoreShortD16Hi | BufferStoreFormatD16X
            | BufferStoreFormatD16HiX | BufferLoadUbyteD16 | BufferLoadUbyteD16Hi
            | BufferLoadSbyteD16 | BufferLoadSbyteD16Hi | BufferLoadShortD16
            | BufferLoadShortD16Hi | BufferLoadFormatD16X | BufferLoadFormatD16HiX
            | BufferLoadFormatD16Xyz => Format::MUBUF,
            FlatLoadUbyteD16 | FlatLoadUbyteD16Hi | FlatLoadSbyteD16 | FlatLoadSbyteD16Hi
            | FlatLoadShortD16 | FlatLoadShortD16Hi | FlatStoreByte | FlatStoreByteD16Hi
            | FlatStoreShort | FlatStoreShortD16Hi => Format::FLAT,
            GlobalLoadDword | GlobalStoreDword | GlobalLoadUbyteD16 | GlobalLoadUbyteD16Hi
            | GlobalLoadSbyteD16 | GlobalLoadSbyteD16Hi | GlobalLoadShortD16
            | GlobalLoadShortD16Hi | GlobalStoreByte | GlobalStoreByteD16Hi | GlobalStoreShort
            | GlobalStoreShortD16Hi => Format::GLOBAL,
            ScratchLoadUbyteD16 | ScratchLoadUbyteD16Hi | ScratchLoadSbyteD16
            | ScratchLoadSbyteD16Hi | ScratchLoadShortD16 | ScratchLoadShortD16Hi
            | ScratchStoreByte | ScratchStoreByteD16Hi | ScratchStoreShort
            | ScratchStoreShortD16Hi => Format::SCRATCH,
            ImageSample | ImageGather4 | ImageLoad | ImageStore => Format::MIMG,
            Exp => Format::EXP,
        }
    }

    /// The variant of a D16 load or store that accesses the high half
    /// of its data register.
    pub fn d16_hi(self) -> Option<Opcode> {
        use Opcode::*;
        Some(match self {
            DsWriteB8 => DsWriteB8D16Hi,
            DsWriteB16 => DsWriteB16D16Hi,
            DsReadU8D16 => DsReadU8D16Hi,
            DsReadI8D16 => DsReadI8D16Hi,
            DsReadU16D16 => DsReadU16D16Hi,
            BufferStoreByte => BufferStoreByteD16Hi,
            BufferStoreShort => BufferStoreShortD16Hi,
            BufferStoreFormatD16X => BufferStoreFormatD16HiX,
            BufferLoadUbyteD16 => BufferLoadUbyteD16Hi,
            BufferLoadSbyteD16 => BufferLoadSbyteD16Hi,
            BufferLoadShortD16 => BufferLoadShortD16Hi,
            BufferLoadFormatD16X => BufferLoadFormatD16HiX,
            FlatLoadUbyteD16 => FlatLoadUbyteD16Hi,
            FlatLoadSbyteD16 => FlatLoadSbyteD16Hi,
            FlatLoadShortD16 => FlatLoadShortD16Hi,
            FlatStoreByte => FlatStoreByteD16Hi,
            FlatStoreShort => FlatStoreShortD16Hi,
            GlobalLoadUbyteD16 => GlobalLoadUbyteD16Hi,
            GlobalLoadSbyteD16 => GlobalLoadSbyteD16Hi,
            GlobalLoadShortD16 => GlobalLoadShortD16Hi,
            GlobalStoreByte => GlobalStoreByteD16Hi,
            GlobalStoreShort => GlobalStoreShortD16Hi,
            ScratchLoadUbyteD16 => ScratchLoadUbyteD16Hi,
            ScratchLoadSbyteD16 => ScratchLoadSbyteD16Hi,
            ScratchLoadShortD16 => ScratchLoadShortD16Hi,
            ScratchStoreByte => ScratchStoreByteD16Hi,
            ScratchStoreShort => ScratchStoreShortD16Hi,
            VInterpP2F16 => VInterpP2HiF16,
            _ => return None,
        })
    }

    #[inline(always)]
    pub fn is_phi(self) -> bool {
        matches!(self, Opcode::PPhi | Opcode::PLinearPhi)
    }

    #[inline(always)]
    pub fn is_branch(self) -> bool {
        matches!(self, Opcode::PBranch | Opcode::PCbranchZ | Opcode::PCbranchNz)
    }
}

impl fmt::Display for Opcode {
    /// Prints the assembler-style name, e.g. `VMadF32` as `v_mad_f32`.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let camel = format!("{:?}", self);
        let mut name = String::with_capacity(camel.len() + 8);
        for (i, c) in camel.chars().enumerate() {
            if c.is_ascii_uppercase() {
                if i != 0 {
                    name.push('_');
                }
                name.push(c.to_ascii_lowercase());
            } else {
                name.push(c);
            }
        }
        f.write_str(&name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OperandKind {
    Temp(Temp),
    /// An inline constant of the given byte width.
    Constant { value: u32, bytes: u8 },
    /// A 32-bit literal that has to be encoded after the instruction.
    Literal(u32),
    Undef(RegClass),
}

/// An instruction input.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Operand {
    kind: OperandKind,
    reg: PhysReg,
    flags: u8,
}

impl Operand {
    const FIXED: u8 = 1 << 0;
    const KILL: u8 = 1 << 1;
    const FIRST_KILL: u8 = 1 << 2;
    const LATE_KILL: u8 = 1 << 3;

    pub fn temp(temp: Temp) -> Self {
        Operand {
            kind: OperandKind::Temp(temp),
            reg: PhysReg::default(),
            flags: 0,
        }
    }

    /// A temporary operand that must be read from `reg`.
    pub fn fixed(temp: Temp, reg: PhysReg) -> Self {
        let mut op = Operand::temp(temp);
        op.set_fixed(reg);
        op
    }

    pub fn c32(value: u32) -> Self {
        Operand {
            kind: OperandKind::Constant { value, bytes: 4 },
            reg: PhysReg::default(),
            flags: 0,
        }
    }

    pub fn c16(value: u16) -> Self {
        Operand {
            kind: OperandKind::Constant {
                value: value as u32,
                bytes: 2,
            },
            reg: PhysReg::default(),
            flags: 0,
        }
    }

    pub fn literal32(value: u32) -> Self {
        Operand {
            kind: OperandKind::Literal(value),
            reg: PhysReg::default(),
            flags: 0,
        }
    }

    pub fn undef(rc: RegClass) -> Self {
        Operand {
            kind: OperandKind::Undef(rc),
            reg: PhysReg::default(),
            flags: 0,
        }
    }

    /// The scalar register `reg` read without a temporary, e.g. `exec`.
    pub fn physical(reg: PhysReg, rc: RegClass) -> Self {
        let mut op = Operand::undef(rc);
        op.set_fixed(reg);
        op
    }

    #[inline(always)]
    pub fn kind(&self) -> OperandKind {
        self.kind
    }

    #[inline(always)]
    pub fn is_temp(&self) -> bool {
        matches!(self.kind, OperandKind::Temp(_))
    }

    /// The temporary, or a temporary with id 0 of the operand's class.
    #[inline(always)]
    pub fn get_temp(&self) -> Temp {
        match self.kind {
            OperandKind::Temp(t) => t,
            _ => Temp::new(0, self.reg_class()),
        }
    }

    #[inline(always)]
    pub fn temp_id(&self) -> u32 {
        match self.kind {
            OperandKind::Temp(t) => t.id(),
            _ => 0,
        }
    }

    pub fn set_temp(&mut self, temp: Temp) {
        self.kind = OperandKind::Temp(temp);
    }

    pub fn reg_class(&self) -> RegClass {
        match self.kind {
            OperandKind::Temp(t) => t.reg_class(),
            OperandKind::Undef(rc) => rc,
            OperandKind::Constant { bytes, .. } if bytes < 4 => RegClass::get(RegType::Vgpr, 2),
            OperandKind::Constant { bytes, .. } => RegClass::get(RegType::Sgpr, bytes as u32),
            OperandKind::Literal(_) => RegClass::S1,
        }
    }

    #[inline(always)]
    pub fn bytes(&self) -> u32 {
        match self.kind {
            OperandKind::Constant { bytes, .. } => bytes as u32,
            _ => self.reg_class().bytes(),
        }
    }

    #[inline(always)]
    pub fn size(&self) -> u32 {
        (self.bytes() + 3) / 4
    }

    /// True for temporaries and undefined values of the given file.
    pub fn is_of_type(&self, ty: RegType) -> bool {
        match self.kind {
            OperandKind::Temp(t) => t.reg_type() == ty,
            OperandKind::Undef(rc) => rc.reg_type() == ty,
            _ => false,
        }
    }

    #[inline(always)]
    pub fn is_undefined(&self) -> bool {
        matches!(self.kind, OperandKind::Undef(_))
    }

    #[inline(always)]
    pub fn is_literal(&self) -> bool {
        matches!(self.kind, OperandKind::Literal(_))
    }

    #[inline(always)]
    pub fn is_constant(&self) -> bool {
        matches!(
            self.kind,
            OperandKind::Constant { .. } | OperandKind::Literal(_)
        )
    }

    pub fn constant_value(&self) -> u32 {
        match self.kind {
            OperandKind::Constant { value, .. } | OperandKind::Literal(value) => value,
            _ => panic!("constant_value() on non-constant operand {:?}", self),
        }
    }

    #[inline(always)]
    pub fn is_fixed(&self) -> bool {
        self.flags & Self::FIXED != 0
    }

    #[inline(always)]
    pub fn phys_reg(&self) -> PhysReg {
        self.reg
    }

    pub fn set_fixed(&mut self, reg: PhysReg) {
        self.flags |= Self::FIXED;
        self.reg = reg;
    }

    #[inline(always)]
    pub fn is_kill(&self) -> bool {
        self.flags & Self::KILL != 0
    }

    /// Clearing the kill flag also clears the first-kill flag.
    pub fn set_kill(&mut self, kill: bool) {
        if kill {
            self.flags |= Self::KILL;
        } else {
            self.flags &= !(Self::KILL | Self::FIRST_KILL);
        }
    }

    #[inline(always)]
    pub fn is_first_kill(&self) -> bool {
        self.flags & Self::FIRST_KILL != 0
    }

    /// Setting the first-kill flag also sets the kill flag.
    pub fn set_first_kill(&mut self, first_kill: bool) {
        if first_kill {
            self.flags |= Self::FIRST_KILL | Self::KILL;
        } else {
            self.flags &= !Self::FIRST_KILL;
        }
    }

    #[inline(always)]
    pub fn is_late_kill(&self) -> bool {
        self.flags & Self::LATE_KILL != 0
    }

    pub fn set_late_kill(&mut self, late_kill: bool) {
        if late_kill {
            self.flags |= Self::LATE_KILL;
        } else {
            self.flags &= !Self::LATE_KILL;
        }
    }

    #[inline(always)]
    pub fn is_kill_before_def(&self) -> bool {
        self.is_kill() && !self.is_late_kill()
    }

    #[inline(always)]
    pub fn is_first_kill_before_def(&self) -> bool {
        self.is_first_kill() && !self.is_late_kill()
    }
}

impl fmt::Debug for Operand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_late_kill() {
            write!(f, "(latekill)")?;
        }
        if self.is_kill() {
            write!(f, "(kill)")?;
        }
        match self.kind {
            OperandKind::Temp(t) => write!(f, "{:?}", t)?,
            OperandKind::Constant { value, .. } => write!(f, "{:#x}", value)?,
            OperandKind::Literal(value) => write!(f, "lit({:#x})", value)?,
            OperandKind::Undef(rc) => write!(f, "undef:{}", rc)?,
        }
        if self.is_fixed() {
            write!(f, ":{}", self.reg)?;
        }
        Ok(())
    }
}

/// An instruction output.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Definition {
    temp: Temp,
    reg: PhysReg,
    flags: u8,
}

impl Definition {
    const FIXED: u8 = 1 << 0;
    const KILL: u8 = 1 << 1;

    pub fn new(temp: Temp) -> Self {
        Definition {
            temp,
            reg: PhysReg::default(),
            flags: 0,
        }
    }

    /// A definition of `temp` that must be written to `reg`.
    pub fn fixed(temp: Temp, reg: PhysReg) -> Self {
        let mut def = Definition::new(temp);
        def.set_fixed(reg);
        def
    }

    /// A definition of a register without a temporary, such as a
    /// clobbered `scc` or the dummy output of a branch.
    pub fn physical(reg: PhysReg, rc: RegClass) -> Self {
        Definition::fixed(Temp::new(0, rc), reg)
    }

    /// A definition without temporary or register yet.
    pub fn unassigned(rc: RegClass) -> Self {
        Definition::new(Temp::new(0, rc))
    }

    #[inline(always)]
    pub fn is_temp(&self) -> bool {
        self.temp.id() != 0
    }

    #[inline(always)]
    pub fn get_temp(&self) -> Temp {
        self.temp
    }

    #[inline(always)]
    pub fn temp_id(&self) -> u32 {
        self.temp.id()
    }

    pub fn set_temp(&mut self, temp: Temp) {
        self.temp = temp;
    }

    #[inline(always)]
    pub fn reg_class(&self) -> RegClass {
        self.temp.reg_class()
    }

    #[inline(always)]
    pub fn bytes(&self) -> u32 {
        self.temp.bytes()
    }

    #[inline(always)]
    pub fn size(&self) -> u32 {
        self.temp.size()
    }

    #[inline(always)]
    pub fn is_fixed(&self) -> bool {
        self.flags & Self::FIXED != 0
    }

    #[inline(always)]
    pub fn phys_reg(&self) -> PhysReg {
        self.reg
    }

    pub fn set_fixed(&mut self, reg: PhysReg) {
        self.flags |= Self::FIXED;
        self.reg = reg;
    }

    /// A killed definition is never read.
    #[inline(always)]
    pub fn is_kill(&self) -> bool {
        self.flags & Self::KILL != 0
    }

    pub fn set_kill(&mut self, kill: bool) {
        if kill {
            self.flags |= Self::KILL;
        } else {
            self.flags &= !Self::KILL;
        }
    }
}

impl fmt::Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Definition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_kill() {
            write!(f, "(kill)")?;
        }
        if self.is_temp() {
            write!(f, "{:?}", self.temp)?;
        } else {
            write!(f, "{}", self.reg_class())?;
        }
        if self.is_fixed() {
            write!(f, ":{}", self.reg)?;
        }
        Ok(())
    }
}

/// Vector ALU modifiers. Per-operand bits are indexed by operand;
/// `opsel` bit 3 selects the high half of the destination.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ValuModifiers {
    pub opsel: u8,
    pub opsel_lo: u8,
    pub opsel_hi: u8,
    pub abs: u8,
    pub neg: u8,
    pub omod: u8,
    pub clamp: bool,
}

impl ValuModifiers {
    fn swap_bits(bits: &mut u8, a: usize, b: usize) {
        let bit_a = (*bits >> a) & 1;
        let bit_b = (*bits >> b) & 1;
        *bits &= !((1 << a) | (1 << b));
        *bits |= (bit_a << b) | (bit_b << a);
    }

    pub fn swap_operands(&mut self, a: usize, b: usize) {
        for bits in [
            &mut self.opsel,
            &mut self.opsel_lo,
            &mut self.opsel_hi,
            &mut self.abs,
            &mut self.neg,
        ] {
            Self::swap_bits(bits, a, b);
        }
    }
}

/// Information the later lowering of pseudo instructions needs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PseudoInfo {
    /// Lowering clobbers `scc`, so a scratch sgpr is needed.
    pub needs_scratch_reg: bool,
    /// `scc` holds a live value that has to be saved to the scratch
    /// sgpr and restored.
    pub tmp_in_scc: bool,
    pub scratch_sgpr: PhysReg,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MimgInfo {
    pub d16: bool,
    pub dmask: u8,
    pub strict_wqm: bool,
}

impl Default for MimgInfo {
    fn default() -> Self {
        MimgInfo {
            d16: false,
            dmask: 0xf,
            strict_wqm: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Instruction {
    pub opcode: Opcode,
    pub format: Format,
    pub operands: SmallVec<[Operand; 4]>,
    pub definitions: SmallVec<[Definition; 2]>,
    pub valu: ValuModifiers,
    /// The 16-bit immediate of SOPK instructions.
    pub salu_imm: u16,
    pub pseudo: PseudoInfo,
    pub mimg: MimgInfo,
    /// DS instruction accesses GDS rather than LDS.
    pub gds: bool,
}

impl Instruction {
    /// An instruction in its opcode's default encoding.
    pub fn new(opcode: Opcode, operands: &[Operand], definitions: &[Definition]) -> Self {
        Instruction {
            opcode,
            format: opcode.default_format(),
            operands: operands.iter().copied().collect(),
            definitions: definitions.iter().copied().collect(),
            valu: ValuModifiers::default(),
            salu_imm: 0,
            pseudo: PseudoInfo::default(),
            mimg: MimgInfo::default(),
            gds: false,
        }
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    #[inline(always)]
    pub fn is_phi(&self) -> bool {
        self.opcode.is_phi()
    }

    #[inline(always)]
    pub fn is_branch(&self) -> bool {
        self.opcode.is_branch()
    }

    #[inline(always)]
    pub fn is_pseudo(&self) -> bool {
        self.format == Format::PSEUDO
    }

    #[inline(always)]
    pub fn is_valu(&self) -> bool {
        self.format.is_valu()
    }

    #[inline(always)]
    pub fn is_salu(&self) -> bool {
        self.format.is_salu()
    }

    #[inline(always)]
    pub fn is_vop2(&self) -> bool {
        self.format.contains(Format::VOP2)
    }

    #[inline(always)]
    pub fn is_vopc(&self) -> bool {
        self.format.contains(Format::VOPC)
    }

    #[inline(always)]
    pub fn is_vop3(&self) -> bool {
        self.format.contains(Format::VOP3)
    }

    #[inline(always)]
    pub fn is_vop3p(&self) -> bool {
        self.format.contains(Format::VOP3P)
    }

    #[inline(always)]
    pub fn is_sdwa(&self) -> bool {
        self.format.contains(Format::SDWA)
    }

    #[inline(always)]
    pub fn is_dpp16(&self) -> bool {
        self.format.contains(Format::DPP16)
    }

    #[inline(always)]
    pub fn is_mimg(&self) -> bool {
        self.format.base() == Format::MIMG
    }

    #[inline(always)]
    pub fn is_ds(&self) -> bool {
        self.format.base() == Format::DS
    }

    #[inline(always)]
    pub fn is_exp(&self) -> bool {
        self.format.base() == Format::EXP
    }

    #[inline(always)]
    pub fn is_smem(&self) -> bool {
        self.format.base() == Format::SMEM
    }

    #[inline(always)]
    pub fn is_vmem(&self) -> bool {
        matches!(self.format.base(), Format::MUBUF | Format::MTBUF | Format::MIMG)
    }

    /// Swaps two operands of a VALU instruction along with their
    /// modifier bits.
    pub fn swap_valu_operands(&mut self, a: usize, b: usize) {
        self.operands.swap(a, b);
        self.valu.swap_operands(a, b);
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, def) in self.definitions.iter().enumerate() {
            if i != 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", def)?;
        }
        if !self.definitions.is_empty() {
            write!(f, " = ")?;
        }
        write!(f, "{}", self.opcode)?;
        if self.is_sdwa() {
            write!(f, "_sdwa")?;
        } else if self.is_vop3() && !self.opcode.default_format().contains(Format::VOP3) {
            write!(f, "_e64")?;
        }
        for (i, op) in self.operands.iter().enumerate() {
            write!(f, "{}{}", if i == 0 { " " } else { ", " }, op)?;
        }
        if self.valu.opsel != 0 {
            write!(f, " opsel:{:#x}", self.valu.opsel)?;
        }
        if self.format == Format::SOPK {
            write!(f, " imm:{:#x}", self.salu_imm)?;
        }
        if self.pseudo.needs_scratch_reg {
            write!(f, " scratch:{}", self.pseudo.scratch_sgpr)?;
            if self.pseudo.tmp_in_scc {
                write!(f, " scc")?;
            }
        }
        Ok(())
    }
}

/// Block classification bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlockKind(u16);

impl BlockKind {
    pub const NONE: BlockKind = BlockKind(0);
    pub const LOOP_PREHEADER: BlockKind = BlockKind(1 << 0);
    pub const LOOP_HEADER: BlockKind = BlockKind(1 << 1);
    pub const LOOP_EXIT: BlockKind = BlockKind(1 << 2);
    pub const CONTINUE: BlockKind = BlockKind(1 << 3);
    pub const BREAK: BlockKind = BlockKind(1 << 4);
    pub const BRANCH: BlockKind = BlockKind(1 << 5);
    pub const MERGE: BlockKind = BlockKind(1 << 6);
    pub const INVERT: BlockKind = BlockKind(1 << 7);
    pub const UNIFORM: BlockKind = BlockKind(1 << 8);
    pub const TOP_LEVEL: BlockKind = BlockKind(1 << 9);

    #[inline(always)]
    pub fn contains(self, other: BlockKind) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline(always)]
    pub fn intersects(self, other: BlockKind) -> bool {
        self.0 & other.0 != 0
    }
}

impl std::ops::BitOr for BlockKind {
    type Output = BlockKind;
    fn bitor(self, rhs: BlockKind) -> BlockKind {
        BlockKind(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for BlockKind {
    fn bitor_assign(&mut self, rhs: BlockKind) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let names = [
            (BlockKind::LOOP_PREHEADER, "loop-preheader"),
            (BlockKind::LOOP_HEADER, "loop-header"),
            (BlockKind::LOOP_EXIT, "loop-exit"),
            (BlockKind::CONTINUE, "continue"),
            (BlockKind::BREAK, "break"),
            (BlockKind::BRANCH, "branch"),
            (BlockKind::MERGE, "merge"),
            (BlockKind::INVERT, "invert"),
            (BlockKind::UNIFORM, "uniform"),
            (BlockKind::TOP_LEVEL, "top-level"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(kind, _)| self.contains(*kind))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "{}", set.join(", "))
    }
}

/// Register demand in dwords per file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegisterDemand {
    pub vgpr: u16,
    pub sgpr: u16,
}

impl RegisterDemand {
    pub const fn new(vgpr: u16, sgpr: u16) -> Self {
        RegisterDemand { vgpr, sgpr }
    }

    pub fn update(&mut self, other: RegisterDemand) {
        self.vgpr = self.vgpr.max(other.vgpr);
        self.sgpr = self.sgpr.max(other.sgpr);
    }

    pub fn add(&mut self, rc: RegClass) {
        match rc.reg_type() {
            RegType::Vgpr => self.vgpr += rc.size() as u16,
            RegType::Sgpr => self.sgpr += rc.size() as u16,
        }
    }

    pub fn sub(&mut self, rc: RegClass) {
        match rc.reg_type() {
            RegType::Vgpr => self.vgpr -= rc.size() as u16,
            RegType::Sgpr => self.sgpr -= rc.size() as u16,
        }
    }

    pub fn exceeds(&self, other: RegisterDemand) -> bool {
        self.vgpr > other.vgpr || self.sgpr > other.sgpr
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BasicBlock {
    pub index: Block,
    pub kind: BlockKind,
    pub loop_nest_depth: u32,
    pub instructions: Vec<Instruction>,
    pub logical_preds: SmallVec<[Block; 2]>,
    pub linear_preds: SmallVec<[Block; 2]>,
    pub logical_succs: SmallVec<[Block; 2]>,
    pub linear_succs: SmallVec<[Block; 2]>,
    /// Maximum register demand at any instruction of the block.
    pub register_demand: RegisterDemand,
    pub live_in_demand: RegisterDemand,
    /// `scc` holds a live value at the end of the block.
    pub scc_live_out: bool,
}

impl BasicBlock {
    pub fn new(index: Block, kind: BlockKind) -> Self {
        BasicBlock {
            index,
            kind,
            loop_nest_depth: 0,
            instructions: Vec::new(),
            logical_preds: SmallVec::new(),
            linear_preds: SmallVec::new(),
            logical_succs: SmallVec::new(),
            linear_succs: SmallVec::new(),
            register_demand: RegisterDemand::default(),
            live_in_demand: RegisterDemand::default(),
            scc_live_out: false,
        }
    }

    /// The predecessors a value of class `rc` flows in from.
    pub fn preds_for(&self, rc: RegClass) -> &[Block] {
        if rc.is_linear() {
            &self.linear_preds
        } else {
            &self.logical_preds
        }
    }

    /// The predecessors matching the operands of `phi`.
    pub fn phi_preds(&self, phi: &Instruction) -> &[Block] {
        if phi.opcode == Opcode::PPhi {
            &self.logical_preds
        } else {
            &self.linear_preds
        }
    }
}

/// Per-device limits and capabilities.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceInfo {
    pub physical_sgprs: u16,
    pub physical_vgprs: u16,
    pub sgpr_alloc_granule: u16,
    pub vgpr_alloc_granule: u16,
    /// Addressable sgprs, excluding vcc and other trailing registers.
    pub sgpr_limit: u16,
    pub vgpr_limit: u16,
    pub max_waves_per_simd: u16,
    pub xnack_enabled: bool,
    pub sram_ecc_enabled: bool,
    pub has_mac_legacy32: bool,
    pub has_fmac_legacy32: bool,
}

impl DeviceInfo {
    pub fn for_gfx_level(gfx_level: GfxLevel) -> Self {
        let (physical_sgprs, sgpr_alloc_granule, sgpr_limit) = if gfx_level >= GfxLevel::Gfx10 {
            (5120, 128, 106)
        } else if gfx_level >= GfxLevel::Gfx8 {
            (800, 16, 102)
        } else {
            (512, 8, 104)
        };
        let (physical_vgprs, vgpr_alloc_granule, max_waves_per_simd) = match gfx_level {
            GfxLevel::Gfx10 => (512, 8, 20),
            l if l >= GfxLevel::Gfx10_3 => (512, 8, 16),
            _ => (256, 4, 10),
        };
        DeviceInfo {
            physical_sgprs,
            physical_vgprs,
            sgpr_alloc_granule,
            vgpr_alloc_granule,
            sgpr_limit,
            vgpr_limit: 256,
            max_waves_per_simd,
            xnack_enabled: false,
            sram_ecc_enabled: false,
            has_mac_legacy32: gfx_level <= GfxLevel::Gfx10_3 && gfx_level != GfxLevel::Gfx10,
            has_fmac_legacy32: gfx_level >= GfxLevel::Gfx10_3 && gfx_level < GfxLevel::Gfx12,
        }
    }
}

/// Values the allocator reports back to the rest of the compiler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProgramConfig {
    pub num_vgprs: u16,
    pub num_sgprs: u16,
    pub num_shared_vgprs: u16,
    pub scratch_bytes_per_wave: u32,
}

/// A shader program: the unit of allocation.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Program {
    pub gfx_level: GfxLevel,
    pub dev: DeviceInfo,
    pub blocks: Vec<BasicBlock>,
    /// Register class of every temporary, indexed by id. Id 0 is
    /// reserved.
    pub temp_rc: Vec<RegClass>,
    /// Ids of the temporaries live on entry to each block.
    pub live_in: Vec<BTreeSet<u32>>,
    /// Current register budget. Allocation may grow it.
    pub max_reg_demand: RegisterDemand,
    pub min_waves: u16,
    pub num_waves: u16,
    pub needs_vcc: bool,
    pub config: ProgramConfig,
}

impl Program {
    pub fn new(gfx_level: GfxLevel) -> Self {
        let dev = DeviceInfo::for_gfx_level(gfx_level);
        Program {
            gfx_level,
            dev,
            blocks: Vec::new(),
            temp_rc: vec![RegClass::S1],
            live_in: Vec::new(),
            max_reg_demand: RegisterDemand::default(),
            min_waves: 1,
            num_waves: dev.max_waves_per_simd,
            needs_vcc: false,
            config: ProgramConfig::default(),
        }
    }

    /// Creates a fresh temporary of class `rc`.
    pub fn allocate_tmp(&mut self, rc: RegClass) -> Temp {
        let id = self.temp_rc.len() as u32;
        self.temp_rc.push(rc);
        Temp::new(id, rc)
    }

    /// The id the next call to `allocate_tmp` will return.
    pub fn peek_allocation_id(&self) -> u32 {
        self.temp_rc.len() as u32
    }

    pub fn add_block(&mut self, kind: BlockKind) -> Block {
        let index = Block::new(self.blocks.len());
        self.blocks.push(BasicBlock::new(index, kind));
        self.live_in.push(BTreeSet::new());
        index
    }

    #[inline(always)]
    pub fn block(&self, block: Block) -> &BasicBlock {
        &self.blocks[block.index()]
    }

    #[inline(always)]
    pub fn block_mut(&mut self, block: Block) -> &mut BasicBlock {
        &mut self.blocks[block.index()]
    }

    pub fn add_linear_edge(&mut self, from: Block, to: Block) {
        self.blocks[from.index()].linear_succs.push(to);
        self.blocks[to.index()].linear_preds.push(from);
    }

    pub fn add_logical_edge(&mut self, from: Block, to: Block) {
        self.blocks[from.index()].logical_succs.push(to);
        self.blocks[to.index()].logical_preds.push(from);
    }

    /// Adds an edge to both the logical and the linear CFG.
    pub fn add_edge(&mut self, from: Block, to: Block) {
        self.add_linear_edge(from, to);
        self.add_logical_edge(from, to);
    }

    pub fn push(&mut self, block: Block, instr: Instruction) {
        self.blocks[block.index()].instructions.push(instr);
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "program: {:?}, budget v{} s{}, config v{} s{}",
            self.gfx_level,
            self.max_reg_demand.vgpr,
            self.max_reg_demand.sgpr,
            self.config.num_vgprs,
            self.config.num_sgprs
        )?;
        for block in &self.blocks {
            let preds = |list: &[Block]| {
                list.iter()
                    .map(|b| b.index().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            writeln!(
                f,
                "block{}: kind={:?} logical_preds=[{}] linear_preds=[{}]",
                block.index.index(),
                block.kind,
                preds(&block.logical_preds),
                preds(&block.linear_preds)
            )?;
            for instr in &block.instructions {
                writeln!(f, "    {}", instr)?;
            }
        }
        Ok(())
    }
}
