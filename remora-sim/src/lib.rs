#![doc = include_str!("../../doc_include.md")]

pub mod logging;
pub mod mock;
