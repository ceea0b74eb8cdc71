//! relaxd - claim, relax, complete.
//!
//! A shared SQLite job store holds structures waiting to be relaxed. Worker
//! processes claim one job at a time with an atomic conditional update, run
//! it through an external calculator, and write the result back while
//! releasing the lock. A scheduler launches generations of workers whenever
//! claimable work exists.

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod evaluator;
pub mod launcher;
pub mod logging;
pub mod output;
pub mod paths;
pub mod store;
pub mod theme;
pub mod worker;
