//! Common low-level modules for adding layers and operations in Burn.
pub mod activation;
pub mod conv;
pub mod drop;
pub mod init;
pub mod patching;
