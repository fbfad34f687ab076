#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod codec;
pub mod errors;
pub mod holdings;
pub mod multicall;
pub mod portfolio;
pub mod price;
