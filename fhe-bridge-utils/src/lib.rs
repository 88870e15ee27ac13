pub mod constants;
pub mod encoding;
pub mod encryption;

pub use encryption::{open, seal, SealedBox};
