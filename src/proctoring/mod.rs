// src/proctoring/mod.rs

pub mod grading;
pub mod projection;
pub mod session;
