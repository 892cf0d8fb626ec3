#[macro_use]
extern crate log;

pub mod cli;
pub mod hmm;
pub mod model;
pub mod processing;
pub mod statistics;
pub mod utils;
