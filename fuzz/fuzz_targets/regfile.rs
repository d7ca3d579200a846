/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

#![no_main]
use gpu_regalloc::fuzzing::arbitrary::{Arbitrary, Result, Unstructured};
use gpu_regalloc::fuzzing::fuzz_target;
use gpu_regalloc::regfile::{RegisterFile, Slot};
use gpu_regalloc::{PhysReg, RegClass};

const NUM_VGPRS: u32 = 8;

const CLASSES: [RegClass; 6] = [
    RegClass::V1,
    RegClass::V2,
    RegClass::V1B,
    RegClass::V2B,
    RegClass::V3B,
    RegClass::V4B,
];

#[derive(Clone, Copy, Debug)]
enum Op {
    Fill { start: PhysReg, rc: RegClass },
    Clear { index: usize },
}

#[derive(Clone, Debug)]
struct TestCase {
    ops: Vec<Op>,
}

impl Arbitrary<'_> for TestCase {
    fn arbitrary(u: &mut Unstructured) -> Result<Self> {
        let mut ops = vec![];
        while bool::arbitrary(u)? {
            if bool::arbitrary(u)? {
                ops.push(Op::Clear {
                    index: u.int_in_range(0..=15)?,
                });
                continue;
            }
            let rc = *u.choose(&CLASSES)?;
            let start = if rc.is_subdword() {
                let byte = u.int_in_range(0..=NUM_VGPRS * 4 - rc.bytes())?;
                PhysReg::vgpr(0).advance(byte as i32)
            } else {
                PhysReg::vgpr(u.int_in_range(0..=NUM_VGPRS - rc.size())?)
            };
            ops.push(Op::Fill { start, rc });
        }
        Ok(TestCase { ops })
    }
}

fuzz_target!(|testcase: TestCase| {
    let _ = env_logger::try_init();
    let mut file = RegisterFile::new();
    // Owner of every byte of v0..v7.
    let mut model: Vec<Option<u32>> = vec![None; (NUM_VGPRS * 4) as usize];
    let mut live: Vec<(u32, PhysReg, RegClass)> = vec![];
    let base = PhysReg::vgpr(0).reg_b();
    let mut next_id = 1;

    for op in testcase.ops {
        log::trace!("op: {:?}", op);
        match op {
            Op::Fill { start, rc } => {
                let first = (start.reg_b() - base) as usize;
                let range = first..first + rc.bytes() as usize;
                let free = model[range.clone()].iter().all(|b| b.is_none());
                assert_eq!(free, !file.test(start, rc.bytes()));
                if !free {
                    continue;
                }
                file.fill_temp(start, rc, next_id);
                for b in &mut model[range] {
                    *b = Some(next_id);
                }
                live.push((next_id, start, rc));
                next_id += 1;
            }
            Op::Clear { index } => {
                if live.is_empty() {
                    continue;
                }
                let (id, start, rc) = live.swap_remove(index % live.len());
                file.clear(start, rc);
                for b in model.iter_mut().filter(|b| **b == Some(id)) {
                    *b = None;
                }
            }
        }

        for (i, owner) in model.iter().enumerate() {
            let reg = PhysReg::from_bytes(base + i as u32);
            let expected = match owner {
                Some(id) => Slot::Owned(*id),
                None => Slot::Empty,
            };
            assert_eq!(file.get_id(reg), expected, "byte {}", i);
        }
    }
});
