/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

#![no_main]
use gpu_regalloc::fuzzing::arbitrary::{Arbitrary, Result, Unstructured};
use gpu_regalloc::fuzzing::fuzz_target;
use gpu_regalloc::moves::ParallelMoves;
use gpu_regalloc::PhysReg;
use std::collections::{HashMap, HashSet};

/// Copies stay within v0..v15; v100 is the scratch register.
const NUM_VGPRS: u32 = 16;

#[derive(Clone, Debug)]
struct TestCase {
    copies: Vec<(PhysReg, PhysReg, u32)>,
}

impl Arbitrary<'_> for TestCase {
    fn arbitrary(u: &mut Unstructured) -> Result<Self> {
        let mut ret = TestCase { copies: vec![] };
        let mut written = HashSet::new();
        let dwords = bool::arbitrary(u)?;
        // An arbitrary set of copies whose destinations do not
        // overlap.
        while bool::arbitrary(u)? {
            let (bytes, src, dst) = if dwords {
                let size = u.int_in_range(1..=4)?;
                let src = u.int_in_range(0..=NUM_VGPRS - size)?;
                let dst = u.int_in_range(0..=NUM_VGPRS - size)?;
                (size * 4, PhysReg::vgpr(src), PhysReg::vgpr(dst))
            } else {
                let bytes = u.int_in_range(1..=6)?;
                let src = u.int_in_range(0..=NUM_VGPRS * 4 - bytes)?;
                let dst = u.int_in_range(0..=NUM_VGPRS * 4 - bytes)?;
                let base = PhysReg::vgpr(0);
                (bytes, base.advance(src as i32), base.advance(dst as i32))
            };

            // Stop if a destination byte would be written twice: that
            // is not a valid parallel copy.
            if (0..bytes).any(|b| written.contains(&(dst.reg_b() + b))) {
                break;
            }
            written.extend((0..bytes).map(|b| dst.reg_b() + b));
            ret.copies.push((src, dst, bytes));
        }
        Ok(ret)
    }
}

fuzz_target!(|testcase: TestCase| {
    let _ = env_logger::try_init();
    let scratch = PhysReg::vgpr(100);
    let mut par = ParallelMoves::new();
    for &(src, dst, bytes) in &testcase.copies {
        par.add(src, dst, bytes, ());
    }

    let (unit, moves) = par.resolve();
    log::trace!("resolved moves ({:?}): {:?}", unit, moves);
    let moves = moves.with_scratch(scratch);

    // The byte each destination byte must end up holding.
    let mut expected: HashMap<u32, u32> = HashMap::new();
    for &(src, dst, bytes) in &testcase.copies {
        for b in 0..bytes {
            expected.insert(dst.reg_b() + b, src.reg_b() + b);
        }
    }

    // Simulate the sequence of moves byte by byte.
    let mut contents: HashMap<u32, u32> = HashMap::new();
    for (src, dst, ()) in moves {
        for b in 0..unit.bytes() {
            let from = src.reg_b() + b;
            let data = contents.get(&from).copied().unwrap_or(from);
            contents.insert(dst.reg_b() + b, data);
        }
    }
    log::trace!("simulated final state: {:?}", contents);

    for (&byte, &expected_data) in &expected {
        let data = contents.get(&byte).copied().unwrap_or(byte);
        assert_eq!(expected_data, data, "wrong value in byte {}", byte);
    }
    for (byte, data) in contents {
        if data != byte && !expected.contains_key(&byte) {
            // Only the scratch register may be clobbered outside the
            // destinations.
            assert_eq!(byte / 4, scratch.reg(), "byte {} was clobbered", byte);
        }
    }
});
