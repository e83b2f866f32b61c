pub mod restart;
pub mod shutdown;
