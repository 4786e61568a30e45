//! Usage accounting: the directory walker and removable-asset suggestions.

pub mod removable;
pub mod walker;
