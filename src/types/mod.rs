//! Core protocol and storage types.

mod frame;
mod value;

pub use frame::{format_f64, Frame};
pub use value::Value;
