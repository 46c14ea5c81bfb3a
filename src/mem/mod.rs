pub mod arb;
pub mod bank;
pub mod server;
pub mod simple;

#[cfg(test)]
mod unit_tests;

pub use arb::{ArbPort, ArbiterStats, DramArb};
pub use bank::{BankState, QueueKind};
pub use simple::{MemStats, SimpleMemory};
