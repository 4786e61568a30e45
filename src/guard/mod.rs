//! Admission control: cached usage, limit policy, invalidation, and the host-facing guard.

pub mod admission;
pub mod cache;
pub mod invalidation;
pub mod policy;
