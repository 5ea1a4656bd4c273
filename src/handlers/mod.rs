// src/handlers/mod.rs

pub mod admin;
pub mod faculty;
pub mod proctoring;
pub mod student;
