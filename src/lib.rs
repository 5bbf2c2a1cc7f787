#[macro_use]
extern crate log;

pub mod auxiliary;
pub mod cli;
pub mod daemonize;
pub mod env;
pub mod error;
pub mod ipc;
pub mod logger;
pub mod options;
pub mod pid_file;
pub mod procs;
pub mod shell;
pub mod signals;
pub mod supervisor;
pub mod watchdog;
pub mod worker;

pub use miette::Result;
