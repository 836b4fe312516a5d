#![cfg_attr(not(test), no_std)]

pub mod bpb;
pub mod catalog;
pub mod dir;
pub mod disk;
pub mod driver;
pub mod fs;
pub mod partition;
pub mod shared;
pub mod table;
pub mod wav;

#[cfg(test)]
mod testing;
