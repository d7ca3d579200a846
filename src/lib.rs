/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! An SSA-based register allocator for AMD GCN/RDNA shader programs.
//!
//! The allocator walks the blocks of a [`Program`] in order and assigns
//! each temporary a physical register directly from the SSA form,
//! splitting live ranges with parallel copies whenever a value has to
//! move to make room. It never spills to memory: when the current
//! register budget is exhausted it grows the budget (up to the limit
//! implied by the program's minimum wave count) or re-packs the
//! register file.

#![allow(clippy::too_many_arguments)]

/// Logs a trace message if the `trace-log` feature is enabled.
macro_rules! trace {
    ($($tt:tt)*) => {
        if cfg!(feature = "trace-log") {
            ::log::trace!($($tt)*);
        }
    };
}

/// Evaluates to true if trace logging is compiled in and enabled.
macro_rules! trace_enabled {
    () => {
        cfg!(feature = "trace-log") && ::log::log_enabled!(::log::Level::Trace)
    };
}

#[macro_use]
mod index;
pub use index::{Block, BlockRange};

pub mod ir;
pub use ir::*;

pub mod target;
pub mod regfile;
pub(crate) mod info;
pub(crate) mod alloc;
pub mod moves;
pub mod liveness;
pub mod checker;

#[cfg(feature = "fuzzing")]
pub mod fuzzing;

pub(crate) type FxHashMap<K, V> = hashbrown::HashMap<K, V, rustc_hash::FxBuildHasher>;
pub(crate) type FxHashSet<V> = hashbrown::HashSet<V, rustc_hash::FxBuildHasher>;

/// The two register files of the machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RegType {
    /// Scalar registers, uniform across the wave.
    Sgpr,
    /// Vector registers, one 32-bit lane per invocation.
    Vgpr,
}

/// A register class: register file, size and a few flags, packed
/// into one byte.
///
/// Bits 0..5 hold the size in dwords, or in bytes for sub-dword
/// classes. Bit 5 selects the vector file, bit 6 marks a linear
/// vector class and bit 7 marks a sub-dword class.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegClass {
    bits: u8,
}

impl RegClass {
    const SIZE_MASK: u8 = 0x1f;
    const VGPR: u8 = 1 << 5;
    const LINEAR: u8 = 1 << 6;
    const SUBDWORD: u8 = 1 << 7;

    pub const S1: RegClass = RegClass::new(RegType::Sgpr, 1);
    pub const S2: RegClass = RegClass::new(RegType::Sgpr, 2);
    pub const S3: RegClass = RegClass::new(RegType::Sgpr, 3);
    pub const S4: RegClass = RegClass::new(RegType::Sgpr, 4);
    pub const S6: RegClass = RegClass::new(RegType::Sgpr, 6);
    pub const S8: RegClass = RegClass::new(RegType::Sgpr, 8);
    pub const S16: RegClass = RegClass::new(RegType::Sgpr, 16);
    pub const V1: RegClass = RegClass::new(RegType::Vgpr, 1);
    pub const V2: RegClass = RegClass::new(RegType::Vgpr, 2);
    pub const V3: RegClass = RegClass::new(RegType::Vgpr, 3);
    pub const V4: RegClass = RegClass::new(RegType::Vgpr, 4);
    pub const V5: RegClass = RegClass::new(RegType::Vgpr, 5);
    pub const V6: RegClass = RegClass::new(RegType::Vgpr, 6);
    pub const V7: RegClass = RegClass::new(RegType::Vgpr, 7);
    pub const V8: RegClass = RegClass::new(RegType::Vgpr, 8);
    pub const V1B: RegClass = RegClass::subdword(1);
    pub const V2B: RegClass = RegClass::subdword(2);
    pub const V3B: RegClass = RegClass::subdword(3);
    pub const V4B: RegClass = RegClass::subdword(4);
    pub const V6B: RegClass = RegClass::subdword(6);
    pub const V8B: RegClass = RegClass::subdword(8);
    pub const V1_LINEAR: RegClass = RegClass::V1.as_linear();
    pub const V2_LINEAR: RegClass = RegClass::V2.as_linear();

    /// A full-dword class of `size` dwords in the given file.
    #[inline(always)]
    pub const fn new(ty: RegType, size: u32) -> Self {
        let ty_bits = match ty {
            RegType::Sgpr => 0,
            RegType::Vgpr => Self::VGPR,
        };
        RegClass {
            bits: ty_bits | (size as u8 & Self::SIZE_MASK),
        }
    }

    const fn subdword(bytes: u32) -> Self {
        RegClass {
            bits: Self::VGPR | Self::SUBDWORD | (bytes as u8 & Self::SIZE_MASK),
        }
    }

    /// The class holding `bytes` bytes in the given file. Vector
    /// classes that are not a multiple of four bytes become sub-dword
    /// classes; scalar classes round up to whole dwords.
    pub fn get(ty: RegType, bytes: u32) -> Self {
        match ty {
            RegType::Sgpr => RegClass::new(ty, (bytes + 3) / 4),
            RegType::Vgpr if bytes % 4 != 0 => RegClass::subdword(bytes),
            RegType::Vgpr => RegClass::new(ty, bytes / 4),
        }
    }

    #[inline(always)]
    pub fn reg_type(self) -> RegType {
        if self.bits & Self::VGPR != 0 {
            RegType::Vgpr
        } else {
            RegType::Sgpr
        }
    }

    #[inline(always)]
    pub fn is_subdword(self) -> bool {
        self.bits & Self::SUBDWORD != 0
    }

    /// Size in dwords, rounded up for sub-dword classes.
    #[inline(always)]
    pub fn size(self) -> u32 {
        if self.is_subdword() {
            (self.bytes() + 3) / 4
        } else {
            (self.bits & Self::SIZE_MASK) as u32
        }
    }

    #[inline(always)]
    pub fn bytes(self) -> u32 {
        if self.is_subdword() {
            (self.bits & Self::SIZE_MASK) as u32
        } else {
            self.size() * 4
        }
    }

    /// Scalar values are always linear: they follow the linear CFG.
    #[inline(always)]
    pub fn is_linear(self) -> bool {
        self.reg_type() == RegType::Sgpr || self.bits & Self::LINEAR != 0
    }

    #[inline(always)]
    pub fn is_linear_vgpr(self) -> bool {
        self.reg_type() == RegType::Vgpr && self.bits & Self::LINEAR != 0
    }

    pub const fn as_linear(self) -> Self {
        RegClass {
            bits: self.bits | Self::LINEAR,
        }
    }

    /// The sub-dword form of a vector class.
    pub fn as_subdword(self) -> Self {
        debug_assert_eq!(self.reg_type(), RegType::Vgpr);
        RegClass::subdword(self.bytes())
    }

    /// The class of the same file with a different byte size.
    pub fn resize(self, bytes: u32) -> Self {
        let rc = RegClass::get(self.reg_type(), bytes);
        if self.is_linear_vgpr() {
            rc.as_linear()
        } else {
            rc
        }
    }
}

impl std::fmt::Debug for RegClass {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl std::fmt::Display for RegClass {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let prefix = match self.reg_type() {
            RegType::Sgpr => "s",
            RegType::Vgpr => "v",
        };
        if self.is_subdword() {
            write!(f, "{}{}b", prefix, self.bytes())
        } else if self.is_linear_vgpr() {
            write!(f, "{}{}_linear", prefix, self.size())
        } else {
            write!(f, "{}{}", prefix, self.size())
        }
    }
}

/// A physical register address in bytes: `reg * 4 + byte`.
///
/// Slots 0..256 are the scalar file (including the special registers
/// such as `vcc`, `m0`, `exec` and `scc`), slots 256..512 are the
/// vector file.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhysReg {
    reg_b: u16,
}

impl PhysReg {
    pub const VCC: PhysReg = PhysReg::new(106);
    pub const VCC_HI: PhysReg = PhysReg::new(107);
    pub const M0: PhysReg = PhysReg::new(124);
    pub const EXEC: PhysReg = PhysReg::new(126);
    pub const EXEC_HI: PhysReg = PhysReg::new(127);
    pub const SCC: PhysReg = PhysReg::new(253);
    /// One past the last addressable slot.
    pub const END: PhysReg = PhysReg::new(512);

    /// The register at the start of slot `reg`.
    #[inline(always)]
    pub const fn new(reg: u32) -> Self {
        PhysReg {
            reg_b: (reg * 4) as u16,
        }
    }

    #[inline(always)]
    pub const fn from_bytes(reg_b: u32) -> Self {
        PhysReg { reg_b: reg_b as u16 }
    }

    #[inline(always)]
    pub fn sgpr(index: u32) -> Self {
        debug_assert!(index < 256);
        PhysReg::new(index)
    }

    #[inline(always)]
    pub fn vgpr(index: u32) -> Self {
        debug_assert!(index < 256);
        PhysReg::new(256 + index)
    }

    /// The slot index.
    #[inline(always)]
    pub fn reg(self) -> u32 {
        (self.reg_b >> 2) as u32
    }

    /// The byte offset within the slot.
    #[inline(always)]
    pub fn byte(self) -> u32 {
        (self.reg_b & 3) as u32
    }

    #[inline(always)]
    pub fn reg_b(self) -> u32 {
        self.reg_b as u32
    }

    /// The register `bytes` bytes further on (or back, if negative).
    #[inline(always)]
    pub fn advance(self, bytes: i32) -> Self {
        PhysReg {
            reg_b: (self.reg_b as i32 + bytes) as u16,
        }
    }

    /// The start of the slot `slots` slots further on.
    #[inline(always)]
    pub fn plus_slots(self, slots: u32) -> Self {
        PhysReg::new(self.reg() + slots)
    }

    #[inline(always)]
    pub fn reg_type(self) -> RegType {
        if self.reg() >= 256 {
            RegType::Vgpr
        } else {
            RegType::Sgpr
        }
    }
}

impl std::fmt::Debug for PhysReg {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl std::fmt::Display for PhysReg {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let slot = PhysReg::new(self.reg());
        match slot {
            PhysReg::VCC => write!(f, "vcc")?,
            PhysReg::VCC_HI => write!(f, "vcc_hi")?,
            PhysReg::M0 => write!(f, "m0")?,
            PhysReg::EXEC => write!(f, "exec")?,
            PhysReg::EXEC_HI => write!(f, "exec_hi")?,
            PhysReg::SCC => write!(f, "scc")?,
            _ if self.reg() >= 256 => write!(f, "v{}", self.reg() - 256)?,
            _ => write!(f, "s{}", self.reg())?,
        }
        if self.byte() != 0 {
            write!(f, "[{}]", self.byte())?;
        }
        Ok(())
    }
}

/// An SSA temporary: an id plus its register class. Id 0 means "no
/// temporary".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Temp {
    id: u32,
    rc: RegClass,
}

impl Default for RegClass {
    fn default() -> Self {
        RegClass::S1
    }
}

impl Temp {
    #[inline(always)]
    pub const fn new(id: u32, rc: RegClass) -> Self {
        Temp { id, rc }
    }

    #[inline(always)]
    pub fn id(self) -> u32 {
        self.id
    }

    #[inline(always)]
    pub fn reg_class(self) -> RegClass {
        self.rc
    }

    #[inline(always)]
    pub fn reg_type(self) -> RegType {
        self.rc.reg_type()
    }

    #[inline(always)]
    pub fn size(self) -> u32 {
        self.rc.size()
    }

    #[inline(always)]
    pub fn bytes(self) -> u32 {
        self.rc.bytes()
    }

    #[inline(always)]
    pub fn is_linear(self) -> bool {
        self.rc.is_linear()
    }
}

impl std::fmt::Debug for Temp {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "%{}:{}", self.id, self.rc)
    }
}

impl std::fmt::Display for Temp {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "%{}", self.id)
    }
}

/// Knobs used by test harnesses to force the slower allocation paths.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RaTestPolicy {
    /// Skip the non-disruptive search and go straight to the
    /// live-range-splitting search.
    pub skip_optimistic_path: bool,
}

/// Options for allocation.
#[derive(Clone, Copy, Debug, Default)]
pub struct RegallocOptions {
    /// Dump the program before and after allocation to the trace log.
    pub verbose_log: bool,
    pub policy: RaTestPolicy,
}

/// Counters describing the work the allocator did.
#[derive(Clone, Copy, Debug, Default)]
pub struct Stats {
    pub blocks: usize,
    pub instructions: usize,
    pub parallelcopies: usize,
    pub copies: usize,
    pub phis_inserted: usize,
    pub live_range_splits: usize,
    pub budget_growths: usize,
    pub repacks: usize,
    pub linear_compactions: usize,
    pub encoding_fixups: usize,
}

/// Result of register allocation. The program itself is rewritten in
/// place; this carries what the caller may want on the side.
#[derive(Clone, Debug, Default)]
pub struct Output {
    /// For every temporary introduced by renaming, the original
    /// temporary it is a copy of.
    pub orig_names: std::collections::BTreeMap<u32, Temp>,
    /// Internal stats from the allocator.
    pub stats: Stats,
}

impl Output {
    /// The original name of `temp`, following renames.
    pub fn original(&self, temp: Temp) -> Temp {
        self.orig_names.get(&temp.id()).copied().unwrap_or(temp)
    }
}

/// An error that aborts allocation of a program.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegAllocError {
    /// The program needs more registers of the given file than the
    /// hardware can address at its minimum wave count.
    TooManyLiveRegs(RegType),
    /// Even a full re-pack of the register file could not find room
    /// for the given temporary.
    OutOfRegisters { temp: Temp, block: Block },
    /// A program invariant the allocator relies on does not hold.
    InvalidProgram(&'static str),
}

impl std::fmt::Display for RegAllocError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RegAllocError::TooManyLiveRegs(ty) => {
                write!(f, "register demand exceeds the {:?} file", ty)
            }
            RegAllocError::OutOfRegisters { temp, block } => {
                write!(f, "no register for {:?} in block{}", temp, block.index())
            }
            RegAllocError::InvalidProgram(what) => write!(f, "invalid program: {}", what),
        }
    }
}

impl std::error::Error for RegAllocError {}

/// Allocates registers for `program`, rewriting it in place.
///
/// The program must carry liveness information: per-block live-in
/// sets and kill flags on operands (see [`liveness::compute`]).
pub fn run(program: &mut Program, options: &RegallocOptions) -> Result<Output, RegAllocError> {
    alloc::run(program, options)
}
