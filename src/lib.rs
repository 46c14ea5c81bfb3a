pub mod base;
pub mod error;
pub mod mem;
pub mod sim;
pub mod timeq;
pub mod traffic;
pub mod ui;
