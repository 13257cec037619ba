#![doc = include_str!("../readme.md")]

pub mod clustering;
pub mod config;
pub mod distribution;
pub mod engine;
pub mod error;
pub mod failure;
pub mod job;
pub mod overhead;
pub mod reclustering;
pub mod run_stats;
pub mod runner;
pub mod trace_log;
pub mod workflow;

#[cfg(test)]
mod tests;
