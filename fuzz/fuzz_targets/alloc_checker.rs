/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

#![no_main]
use gpu_regalloc::fuzzing::arbitrary::{Arbitrary, Result, Unstructured};
use gpu_regalloc::fuzzing::fuzz_target;
use gpu_regalloc::fuzzing::program::{arbitrary_program_with_options, Options};
use gpu_regalloc::{checker, Program, RaTestPolicy, RegAllocError, RegallocOptions};

#[derive(Clone, Debug)]
struct TestCase {
    program: Program,
    options: RegallocOptions,
}

impl Arbitrary<'_> for TestCase {
    fn arbitrary(u: &mut Unstructured) -> Result<TestCase> {
        Ok(TestCase {
            program: arbitrary_program_with_options(
                u,
                &Options {
                    control_flow: true,
                    subdword: bool::arbitrary(u)?,
                    fixed_regs: true,
                    max_regions: 8,
                    max_instrs_per_block: 12,
                },
            )?,
            options: RegallocOptions {
                verbose_log: false,
                policy: RaTestPolicy {
                    skip_optimistic_path: bool::arbitrary(u)?,
                },
            },
        })
    }
}

fuzz_target!(|testcase: TestCase| {
    let mut program = testcase.program;
    let _ = env_logger::try_init();
    log::trace!("program:\n{:?}", program);

    let output = match gpu_regalloc::run(&mut program, &testcase.options) {
        Ok(output) => output,
        // Generated programs may simply need too many registers.
        Err(RegAllocError::TooManyLiveRegs(_)) => return,
        Err(e) => panic!("regalloc did not succeed: {}", e),
    };
    checker::check(&program, &output).expect("checker failed");
});
