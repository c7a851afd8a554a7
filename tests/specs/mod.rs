//! Cross-crate scenario specs for the execution core.
//!
//! Each module exercises one subsystem end to end, with in-test Unix
//! socket daemons standing in for plugin processes.

mod prelude;

mod bus;
mod orchestrator;
mod process;
mod rpc;
