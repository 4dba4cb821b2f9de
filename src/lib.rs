pub mod config;
pub mod credit;
pub mod device;
pub mod metrics;
pub mod msg;
pub mod neighbor;
pub mod packet;
pub mod session;
pub mod supervisor;
pub mod tags;
pub mod transport;
