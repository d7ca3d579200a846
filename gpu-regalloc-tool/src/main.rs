use std::path::PathBuf;

use clap::Parser;
use gpu_regalloc::{
    checker, liveness, moves::MoveLoc, moves::ParallelMoves, Opcode, Output, Program,
    RaTestPolicy, RegallocOptions,
};

#[derive(Parser)]
/// Tool for testing gpu-regalloc.
struct Args {
    /// Print the input program and the result of register allocation.
    #[clap(short = 'v')]
    verbose: bool,

    /// Recompute kill flags, register demand and live-in sets before
    /// allocating, instead of trusting the ones in the input.
    #[clap(long)]
    liveness: bool,

    /// Force the live-range-splitting search for every variable.
    #[clap(long)]
    skip_optimistic_path: bool,

    /// Input file containing a bincode-encoded Program.
    input: PathBuf,
}

fn main() {
    pretty_env_logger::init();
    let args = Args::parse();

    let input = std::fs::read(&args.input).expect("could not read input file");
    let mut program: Program =
        bincode::deserialize(&input).expect("could not deserialize input file");

    if args.liveness {
        liveness::compute(&mut program);
    }
    if args.verbose {
        println!("Input program:\n{program}");
    }

    let options = RegallocOptions {
        verbose_log: true,
        policy: RaTestPolicy {
            skip_optimistic_path: args.skip_optimistic_path,
        },
    };
    let output = match gpu_regalloc::run(&mut program, &options) {
        Ok(output) => output,
        Err(e) => {
            panic!("Register allocation failed: {e:#?}");
        }
    };

    if args.verbose {
        print_output(&program, &output);
    }

    if let Err(e) = checker::check(&program, &output) {
        panic!("Register allocation checker failed: {e}");
    }
}

fn print_output(program: &Program, output: &Output) {
    print!("Register allocation result:\n{program}");
    println!(
        "registers: {} vgprs, {} sgprs, {} waves",
        program.config.num_vgprs, program.config.num_sgprs, program.num_waves
    );
    println!("{:#?}", output.stats);

    for block in &program.blocks {
        for (i, instr) in block.instructions.iter().enumerate() {
            if instr.opcode != Opcode::PParallelcopy {
                continue;
            }
            let mut par = ParallelMoves::new();
            for (op, def) in instr.operands.iter().zip(instr.definitions.iter()) {
                if op.is_temp() && op.is_fixed() && def.is_fixed() {
                    par.add(op.phys_reg(), def.phys_reg(), def.bytes(), ());
                }
            }
            let (unit, moves) = par.resolve();
            println!("  block{}:{} lowered in {:?} moves:", block.index.index(), i, unit);
            for &(src, dst, ()) in moves.moves() {
                let show = |loc: MoveLoc| match loc {
                    MoveLoc::Reg(reg) => format!("{reg}"),
                    MoveLoc::Scratch => "scratch".to_string(),
                };
                println!("    {} <- {}", show(dst), show(src));
            }
        }
    }
}
