#![cfg_attr(not(test), no_std)]

pub mod commutation;
pub mod config;
pub mod emergency;
pub mod hall;
pub mod remote;
pub mod shared;
pub mod timer;
pub mod utils;
