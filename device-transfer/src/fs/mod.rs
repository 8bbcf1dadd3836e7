//! Host filesystem helpers: tree measurement, destination rotation and
//! name sanitizing.

pub mod rotation;
pub mod sanitize;
pub mod walker;
