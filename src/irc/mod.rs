pub mod codec;
pub mod dispatch;
pub mod message;
pub mod session;
pub mod supervisor;
pub mod transport;
