//! The four task kinds (§2 "Tasks", §4.2-§4.5), each implementing the uniform
//! `setup -> run -> finish` contract of [`crate::task_entry::Task`].

pub mod compile;
pub mod execute;
pub mod scoring;
pub mod summary;
