pub mod channel;
pub mod transport;
