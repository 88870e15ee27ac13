use std::fmt;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, trace};

/// A step of the encryption or decryption protocols.
///
/// Authenticated decryption walks `Idle -> KeypairGenerated -> AuthorizationBuilt -> Signed
/// -> Decrypted`, and may reach `Failed` from any of them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    InstanceCreated,
    InputSessionOpened,
    InputEncrypted,
    Idle,
    KeypairGenerated,
    AuthorizationBuilt,
    Signed,
    Decrypted,
    PublicDecryptRequested,
    PublicDecrypted,
    Failed,
}

impl Step {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InstanceCreated => "instance_created",
            Self::InputSessionOpened => "input_session_opened",
            Self::InputEncrypted => "input_encrypted",
            Self::Idle => "idle",
            Self::KeypairGenerated => "keypair_generated",
            Self::AuthorizationBuilt => "authorization_built",
            Self::Signed => "signed",
            Self::Decrypted => "decrypted",
            Self::PublicDecryptRequested => "public_decrypt_requested",
            Self::PublicDecrypted => "public_decrypted",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A progress notification, `onProgress(step, detail)` style.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub step: Step,
    pub detail: String,
}

/// Forwards progress events to an optional listener channel.
///
/// Every event is also traced at debug level, so callers without a listener still see
/// the protocol steps in their logs.
#[derive(Clone, Debug, Default)]
pub struct ProgressReporter {
    sender: Option<UnboundedSender<ProgressEvent>>,
}

impl ProgressReporter {
    /// Constructor
    #[must_use]
    pub const fn new(sender: Option<UnboundedSender<ProgressEvent>>) -> Self {
        Self { sender }
    }

    pub fn report(&self, step: Step, detail: impl Into<String>) {
        let detail = detail.into();
        debug!(
            target = "fhe-bridge-progress",
            event = step.as_str(),
            detail = %detail,
            "Protocol step reached"
        );
        if let Some(sender) = &self.sender {
            if sender.send(ProgressEvent { step, detail }).is_err() {
                trace!(
                    target = "fhe-bridge-progress",
                    event = "progress_listener_closed",
                    "Progress listener dropped, event discarded"
                );
            }
        }
    }
}
