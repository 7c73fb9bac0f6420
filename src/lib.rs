// vkutil - helpers for the boilerplate-heavy parts of Vulkan
//
// Device selection, depth format negotiation, shader loading,
// specialization constants, feature sets and one-shot submission.

pub mod backend;
pub mod config;

pub use backend::*;
