/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Support for the fuzz targets: an arbitrary program generator and
//! re-exports of the fuzzing entry points.

pub mod program;

pub use libfuzzer_sys::{arbitrary, fuzz_target};
