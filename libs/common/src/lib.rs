pub mod id;
pub mod wire;

pub use wire::{ClientEvent, ServerEvent};
