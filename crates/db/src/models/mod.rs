//! Row models (`FromRow`) and input DTOs, one module per table.

pub mod annotation;
pub mod annotator;
pub mod assignment;
pub mod consensus;
pub mod event;
pub mod job;
pub mod probe;
pub mod project;
pub mod review;
pub mod task;
pub mod trust;
