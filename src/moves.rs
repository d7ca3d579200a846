/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Sequencing of parallel copies.
//!
//! A `p_parallelcopy` reads all of its sources before it writes any
//! destination. Lowering it needs an order of single moves with the
//! same effect, which may have to break a cycle through a scratch
//! location. The allocator itself only emits the parallel form; this
//! resolver is what the checker and the tools use to show that every
//! emitted copy can be lowered.

use crate::PhysReg;
use core::fmt::Debug;
use smallvec::{smallvec, SmallVec};

/// One end of a sequential move: a register unit, or the scratch
/// location that breaks a cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MoveLoc {
    Reg(PhysReg),
    Scratch,
}

impl MoveLoc {
    pub fn is_scratch(self) -> bool {
        self == MoveLoc::Scratch
    }
}

/// A list of moves to be performed in sequence, with auxiliary data
/// attached to each.
pub type MoveVec<T> = SmallVec<[(MoveLoc, MoveLoc, T); 16]>;

/// A sequence of moves between real registers.
pub type RegMoveVec<T> = SmallVec<[(PhysReg, PhysReg, T); 16]>;

/// The unit a batch of moves is performed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveUnit {
    Dword,
    Byte,
}

impl MoveUnit {
    pub fn bytes(self) -> u32 {
        match self {
            MoveUnit::Dword => 4,
            MoveUnit::Byte => 1,
        }
    }
}

/// A list of moves to be performed in sequence, like a `MoveVec<T>`,
/// except that the scratch location may occur as well.
#[derive(Clone, Debug)]
pub enum MoveVecWithScratch<T> {
    /// No scratch was actually used.
    NoScratch(MoveVec<T>),
    /// A scratch location was used.
    Scratch(MoveVec<T>),
}

/// A `ParallelMoves` collects copies of register ranges that happen
/// in parallel, i.e. all reads of sources semantically happen before
/// all writes of destinations, and computes a list of sequential unit
/// moves with the same effect.
///
/// Copies are split into dword moves when every copy of the batch is
/// dword aligned and a whole number of dwords long, into byte moves
/// otherwise.
pub struct ParallelMoves<T: Clone + Copy + Default> {
    copies: SmallVec<[(PhysReg, PhysReg, u32, T); 8]>,
}

impl<T: Clone + Copy + Default + PartialEq> Default for ParallelMoves<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Copy + Default + PartialEq> ParallelMoves<T> {
    pub fn new() -> Self {
        Self {
            copies: smallvec![],
        }
    }

    /// Adds a copy of `bytes` bytes from `from` to `to`.
    pub fn add(&mut self, from: PhysReg, to: PhysReg, bytes: u32, t: T) {
        debug_assert!(bytes > 0);
        self.copies.push((from, to, bytes, t));
    }

    /// The unit the copies will be split into.
    pub fn unit(&self) -> MoveUnit {
        let dword_aligned = self
            .copies
            .iter()
            .all(|&(from, to, bytes, _)| from.byte() == 0 && to.byte() == 0 && bytes % 4 == 0);
        if dword_aligned {
            MoveUnit::Dword
        } else {
            MoveUnit::Byte
        }
    }

    fn unit_moves(&self, unit: MoveUnit) -> MoveVec<T> {
        let step = unit.bytes();
        let mut moves: MoveVec<T> = smallvec![];
        for &(from, to, bytes, t) in &self.copies {
            for offset in (0..bytes).step_by(step as usize) {
                let src = from.advance(offset as i32);
                let dst = to.advance(offset as i32);
                // A unit copied onto itself needs no move.
                if src != dst {
                    moves.push((MoveLoc::Reg(src), MoveLoc::Reg(dst), t));
                }
            }
        }
        moves
    }

    /// Resolves the parallel copies to a sequence of unit moves, such
    /// that the combined effect of the sequential moves is as-if all
    /// copies happened in parallel.
    ///
    /// If there is a cycle, the scratch location is used to break it.
    /// The caller fills it in with `MoveVecWithScratch::with_scratch`.
    pub fn resolve(self) -> (MoveUnit, MoveVecWithScratch<T>) {
        let unit = self.unit();
        let mut parallel_moves = self.unit_moves(unit);

        // Easy case: zero or one move.
        if parallel_moves.len() <= 1 {
            return (unit, MoveVecWithScratch::NoScratch(parallel_moves));
        }

        // Sort moves by source so that we can efficiently test for
        // presence.
        parallel_moves.sort_by_key(|&(src, dst, _)| (src, dst));

        let sources_overlap_dests = parallel_moves.iter().any(|&(_, dst, _)| {
            parallel_moves
                .binary_search_by_key(&dst, |&(src, _, _)| src)
                .is_ok()
        });
        if !sources_overlap_dests {
            return (unit, MoveVecWithScratch::NoScratch(parallel_moves));
        }

        // Each unit has only one writer, so every move blocks at most
        // one other move: the dependency graph consists of chains and
        // simple rings, and a ring is complete as soon as it is found.
        parallel_moves.sort_by_key(|&(_, dst, _)| dst);
        parallel_moves.dedup();
        debug_assert!(
            parallel_moves.windows(2).all(|w| w[0].1 != w[1].1),
            "two copies write the same register"
        );

        // For each move, the move that overwrites its source and so
        // must come after it.
        let must_come_before: SmallVec<[Option<usize>; 16]> = parallel_moves
            .iter()
            .map(|&(src, _, _)| {
                parallel_moves
                    .binary_search_by_key(&src, |&(_, dst, _)| dst)
                    .ok()
            })
            .collect();

        // A stack-based DFS emitting moves in postorder; reversed at
        // the end.
        let n = parallel_moves.len();
        let mut ret: MoveVec<T> = smallvec![];
        let mut stack: SmallVec<[usize; 16]> = smallvec![];
        let mut visited: SmallVec<[bool; 16]> = smallvec![false; n];
        let mut onstack: SmallVec<[bool; 16]> = smallvec![false; n];
        let mut scratch_used = false;

        let unwind = |stack: &mut SmallVec<[usize; 16]>,
                          onstack: &mut SmallVec<[bool; 16]>,
                          ret: &mut MoveVec<T>| {
            while let Some(top) = stack.pop() {
                ret.push(parallel_moves[top]);
                onstack[top] = false;
            }
        };

        loop {
            let Some(&top) = stack.last() else {
                match visited.iter().position(|&flag| !flag) {
                    Some(next) => {
                        stack.push(next);
                        onstack[next] = true;
                        continue;
                    }
                    None => break,
                }
            };

            visited[top] = true;
            match must_come_before[top] {
                Some(next) if !visited[next] && !onstack[next] => {
                    stack.push(next);
                    onstack[next] = true;
                }
                Some(next) if onstack[next] => {
                    // A ring. In reversed order this becomes
                    //
                    //     scratch := C
                    //     C := B
                    //     B := A
                    //     A := scratch
                    let mut scratch_src = None;
                    while let Some(move_idx) = stack.pop() {
                        onstack[move_idx] = false;
                        let (src, dst, t) = parallel_moves[move_idx];
                        if scratch_src.is_none() {
                            scratch_src = Some(src);
                            scratch_used = true;
                            ret.push((MoveLoc::Scratch, dst, t));
                        } else {
                            ret.push((src, dst, t));
                        }
                        if move_idx == next {
                            break;
                        }
                    }
                    if let Some(src) = scratch_src {
                        ret.push((src, MoveLoc::Scratch, T::default()));
                    }
                }
                // No successor, or one that is already emitted.
                _ => unwind(&mut stack, &mut onstack, &mut ret),
            }
        }

        ret.reverse();

        let moves = if scratch_used {
            MoveVecWithScratch::Scratch(ret)
        } else {
            MoveVecWithScratch::NoScratch(ret)
        };
        (unit, moves)
    }
}

impl<T: Copy> MoveVecWithScratch<T> {
    /// Fills in the scratch location, if needed, and returns the final
    /// list of moves. `scratch` must not occur anywhere in the copies
    /// given to the resolver.
    pub fn with_scratch(self, scratch: PhysReg) -> RegMoveVec<T> {
        self.moves()
            .iter()
            .map(|&(src, dst, t)| {
                let fill = |loc: MoveLoc| match loc {
                    MoveLoc::Reg(reg) => {
                        debug_assert_ne!(reg, scratch, "scratch is also a source or destination");
                        reg
                    }
                    MoveLoc::Scratch => scratch,
                };
                debug_assert!(!(src.is_scratch() && dst.is_scratch()));
                (fill(src), fill(dst), t)
            })
            .collect()
    }

    /// Unwrap without a scratch location.
    pub fn without_scratch(self) -> Option<RegMoveVec<T>> {
        match self {
            MoveVecWithScratch::NoScratch(moves) => Some(
                moves
                    .into_iter()
                    .filter_map(|(src, dst, t)| match (src, dst) {
                        (MoveLoc::Reg(src), MoveLoc::Reg(dst)) => Some((src, dst, t)),
                        _ => None,
                    })
                    .collect(),
            ),
            MoveVecWithScratch::Scratch(..) => None,
        }
    }

    /// Do we need a scratch location?
    pub fn needs_scratch(&self) -> bool {
        matches!(self, MoveVecWithScratch::Scratch(..))
    }

    pub fn moves(&self) -> &MoveVec<T> {
        match self {
            MoveVecWithScratch::NoScratch(moves) | MoveVecWithScratch::Scratch(moves) => moves,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    /// Runs `moves` on a byte-addressed machine where every byte
    /// initially holds its own address.
    fn simulate(unit: MoveUnit, moves: &RegMoveVec<()>) -> BTreeMap<u32, u32> {
        let mut state = BTreeMap::new();
        for &(src, dst, ()) in moves {
            for b in 0..unit.bytes() {
                let from = src.reg_b() + b;
                let value = *state.get(&from).unwrap_or(&from);
                state.insert(dst.reg_b() + b, value);
            }
        }
        state
    }

    fn read(state: &BTreeMap<u32, u32>, reg: PhysReg, b: u32) -> u32 {
        let addr = reg.reg_b() + b;
        *state.get(&addr).unwrap_or(&addr)
    }

    #[test]
    fn swap_needs_scratch() {
        let a = PhysReg::vgpr(5);
        let b = PhysReg::vgpr(6);
        let mut pm = ParallelMoves::new();
        pm.add(a, b, 4, ());
        pm.add(b, a, 4, ());
        let (unit, moves) = pm.resolve();
        assert_eq!(unit, MoveUnit::Dword);
        assert!(moves.needs_scratch());
        let scratch = PhysReg::vgpr(100);
        let seq = moves.with_scratch(scratch);
        assert_eq!(seq.len(), 3);
        let state = simulate(unit, &seq);
        assert_eq!(read(&state, b, 0), a.reg_b());
        assert_eq!(read(&state, a, 0), b.reg_b());
    }

    #[test]
    fn chain_is_ordered_without_scratch() {
        let r = |i| PhysReg::sgpr(i);
        let mut pm = ParallelMoves::new();
        pm.add(r(0), r(1), 4, ());
        pm.add(r(1), r(2), 4, ());
        pm.add(r(2), r(3), 4, ());
        let (unit, moves) = pm.resolve();
        let seq = moves.without_scratch().unwrap();
        assert_eq!(seq.len(), 3);
        let state = simulate(unit, &seq);
        for i in 1..4 {
            assert_eq!(read(&state, r(i), 0), r(i - 1).reg_b());
        }
    }

    #[test]
    fn misaligned_copies_move_bytes() {
        let mut pm = ParallelMoves::new();
        // A 16-bit value moves from the high half to the low half of
        // the same register while the low half goes up.
        let lo = PhysReg::vgpr(0);
        let hi = lo.advance(2);
        pm.add(hi, lo, 2, ());
        pm.add(lo, hi, 2, ());
        let (unit, moves) = pm.resolve();
        assert_eq!(unit, MoveUnit::Byte);
        let seq = moves.with_scratch(PhysReg::vgpr(9));
        let state = simulate(unit, &seq);
        assert_eq!(read(&state, lo, 0), hi.reg_b());
        assert_eq!(read(&state, lo, 1), hi.reg_b() + 1);
        assert_eq!(read(&state, hi, 0), lo.reg_b());
    }

    #[test]
    fn self_copies_vanish() {
        let mut pm = ParallelMoves::<()>::new();
        pm.add(PhysReg::vgpr(3), PhysReg::vgpr(3), 8, ());
        let (_, moves) = pm.resolve();
        assert!(moves.moves().is_empty());
    }
}
