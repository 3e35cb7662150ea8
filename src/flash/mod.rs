//! Program image loading and batch programming

pub mod image;
pub mod programmer;

pub use image::BinaryImage;
pub use programmer::{ProgramMode, ProgramResult, Programmer};
