//! A collection of CPU power models.

pub mod constant;
pub mod cubic;
pub mod linear;
pub mod square;
