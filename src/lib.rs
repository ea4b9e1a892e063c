#![allow(unstable_name_collisions)]
#![doc = include_str!("../README.md")]

mod map;
mod raw;

pub use map::{HashMap, Pinned};
pub use seize::{Guard, LocalGuard, OwnedGuard};
