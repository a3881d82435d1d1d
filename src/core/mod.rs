//! Core logic: types, parsing, resolution, assembly, planning, synth.

pub mod assembler;
pub mod buildspec;
pub mod grants;
pub mod naming;
pub mod parser;
pub mod planner;
pub mod resolver;
pub mod stages;
pub mod state;
pub mod synth;
pub mod topology;
pub mod types;
