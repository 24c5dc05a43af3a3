pub mod manual;
pub mod rpc;

pub use manual::*;
pub use rpc::*;
