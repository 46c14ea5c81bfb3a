pub mod module;
pub mod packet;
pub mod port;
pub mod timing;
