// src/models/mod.rs

pub mod exam;
pub mod session;
pub mod violation;
