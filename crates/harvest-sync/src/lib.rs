pub mod buffer;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod fence;
pub mod reconciler;

mod deadline;
