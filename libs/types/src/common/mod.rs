//! Primitive types shared by every snapshot

pub mod address;
pub mod errors;
