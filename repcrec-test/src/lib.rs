//! Test support for RepCRec: helpers that run command scripts and a seeded workload simulator
//! that checks the engine invariants after every command.

pub mod command_gen;
pub mod script;
pub mod simulator;
