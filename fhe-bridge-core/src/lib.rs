#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]

pub mod authorization;
pub mod config;
pub mod coprocessor;
pub mod encrypt;
pub mod errors;
pub mod instance;
pub mod keypair;
pub mod network;
pub mod normalize;
pub mod progress;
pub mod public_decrypt;
pub mod relayer;
pub mod types;
pub mod user_decrypt;

#[cfg(test)]
mod test_utils;

pub use config::FheBridgeConfig;
pub use errors::FheBridgeError;
pub use instance::{create_instance, FheInstance, InstanceHandle, InstanceManager, InstanceOptions};
pub use types::{BitWidth, CiphertextHandle, EncryptedInput};
