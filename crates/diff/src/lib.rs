//! Skiff structural diff: addressable paths, rule-driven comparison of desired
//! vs live documents and minimal patch documents.

#![forbid(unsafe_code)]

pub mod compare;
pub mod path;
pub mod quantity;
pub mod sets;

pub use compare::{
    determine_update_action, find_differences, CompareResult, Comparer, DiffSummary, Differences, PathComparison,
    UpdateAction,
};
pub use path::{Path, PathElem};
pub use quantity::Quantity;
pub use sets::{compare_object_sets, compare_object_sets_with, SetDiff};
