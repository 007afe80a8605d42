#![cfg_attr(not(feature = "std"), no_std)]
extern crate alloc;

mod utils;

pub mod block;
pub mod codes;
pub mod queue;
pub mod table;
pub mod discovery;
pub mod hex;
pub mod image;
pub mod boot;
#[cfg(feature = "master")]
pub mod master;
