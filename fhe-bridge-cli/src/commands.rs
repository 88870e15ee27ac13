use std::{collections::BTreeMap, str::FromStr};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use ethers::types::Address;
use fhe_bridge_core::{
    keypair::EphemeralKeypair, network::KeyHolder, progress::ProgressEvent, BitWidth,
    FheBridgeConfig, InstanceHandle, InstanceManager, InstanceOptions,
};
use serde_json::{json, Value};
use tokio::{
    sync::mpsc::{self, UnboundedSender},
    task::JoinHandle,
};
use tracing::info;

/// Environment variable holding the signing key for headless operation
pub const PRIVATE_KEY_ENV: &str = "FHE_BRIDGE_PRIVATE_KEY";

#[derive(Debug, Parser)]
#[command(name = "fhe-bridge", about = "Encrypt and decrypt values through an FHE coprocessor")]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true)]
    pub config_path: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Encrypt a value for a contract and user
    Encrypt {
        #[arg(long, value_parser = parse_address)]
        contract: Address,
        /// Defaults to the address of the signing key
        #[arg(long, value_parser = parse_address)]
        user: Option<Address>,
        #[arg(long)]
        value: u128,
        #[arg(long, default_value_t = 32)]
        bits: u16,
    },
    /// Decrypt handles the signing key is allowed to read
    UserDecrypt {
        #[arg(long, value_parser = parse_address)]
        contract: Address,
        #[arg(long = "handle", required = true)]
        handles: Vec<String>,
        #[arg(long)]
        validity_days: Option<u64>,
    },
    /// Decrypt publicly decryptable handles
    PublicDecrypt {
        #[arg(long = "handle", required = true)]
        handles: Vec<String>,
    },
    /// Generate an ephemeral decryption keypair
    Keypair,
}

fn parse_address(value: &str) -> Result<Address, String> {
    Address::from_str(value).map_err(|e| format!("invalid address `{value}`: {e}"))
}

/// Runs a command and returns its JSON output.
///
/// # Errors
///
/// Returns an error if the configuration or the signing key is missing, or if the
/// operation itself fails.
pub async fn execute(cli: Cli) -> Result<Value> {
    let Cli {
        config_path,
        command,
    } = cli;
    match command {
        Command::Keypair => {
            let keypair = EphemeralKeypair::generate();
            Ok(json!({
                "publicKey": keypair.public_key_hex(),
                "privateKey": keypair.private_key_hex(),
            }))
        }
        Command::Encrypt {
            contract,
            user,
            value,
            bits,
        } => {
            let bit_width = BitWidth::try_from(bits).map_err(|e| anyhow!(e))?;
            let session = Session::connect(config_path).await?;
            let output = encrypt(&session.instance, contract, user, value, bit_width).await;
            session.close().await?;
            output
        }
        Command::UserDecrypt {
            contract,
            handles,
            validity_days,
        } => {
            let session = Session::connect(config_path).await?;
            let output = user_decrypt(&session.instance, contract, &handles, validity_days).await;
            session.close().await?;
            output
        }
        Command::PublicDecrypt { handles } => {
            let session = Session::connect(config_path).await?;
            let output = public_decrypt(&session.instance, &handles).await;
            session.close().await?;
            output
        }
    }
}

async fn encrypt(
    instance: &InstanceHandle,
    contract: Address,
    user: Option<Address>,
    value: u128,
    bit_width: BitWidth,
) -> Result<Value> {
    let user = match user {
        Some(user) => user,
        None => instance.default_key_holder().await?.address(),
    };
    let input = instance
        .encrypt(contract, user, value, Some(bit_width))
        .await?;
    Ok(serde_json::to_value(input)?)
}

async fn user_decrypt(
    instance: &InstanceHandle,
    contract: Address,
    handles: &[String],
    validity_days: Option<u64>,
) -> Result<Value> {
    let key_holder = instance.default_key_holder().await?;
    let values = instance
        .decrypt_authenticated(contract, key_holder.as_ref(), handles, validity_days)
        .await?;
    let values = values
        .into_iter()
        .map(|(handle, value)| (handle.to_string(), value.to_string()))
        .collect::<BTreeMap<_, _>>();
    Ok(json!(values))
}

async fn public_decrypt(instance: &InstanceHandle, handles: &[String]) -> Result<Value> {
    let result = instance.decrypt_public(handles).await?;
    Ok(json!({
        "values": result.values.iter().map(ToString::to_string).collect::<Vec<_>>(),
        "cleartexts": result.cleartexts,
        "proof": result.proof,
    }))
}

/// A headless instance and the task logging its progress events
struct Session {
    instance: InstanceHandle,
    progress_logger: JoinHandle<()>,
}

impl Session {
    /// Loads the configuration and creates a headless instance signing with the key from
    /// [`PRIVATE_KEY_ENV`].
    async fn connect(config_path: Option<String>) -> Result<Self> {
        let config_path = config_path.context("--config-path is required for this command")?;
        let config = FheBridgeConfig::from_file_path(&config_path)
            .with_context(|| format!("Failed to load configuration from `{config_path}`"))?;
        let private_key = std::env::var(PRIVATE_KEY_ENV)
            .with_context(|| format!("{PRIVATE_KEY_ENV} must be set for headless operation"))?;

        let (sender, progress_logger) = spawn_progress_logger();
        let options = InstanceOptions::new(config)
            .with_headless(None, private_key)
            .with_progress(sender);
        let instance = InstanceManager::with_relayer().initialize(options).await?;
        Ok(Self {
            instance,
            progress_logger,
        })
    }

    /// Drops the instance, which closes the progress channel, and waits until every queued
    /// event is logged.
    async fn close(self) -> Result<()> {
        let Self {
            instance,
            progress_logger,
        } = self;
        drop(instance);
        progress_logger
            .await
            .context("Progress logging task failed")
    }
}

/// Logs progress events until every sender is dropped.
fn spawn_progress_logger() -> (UnboundedSender<ProgressEvent>, JoinHandle<()>) {
    let (sender, mut receiver) = mpsc::unbounded_channel::<ProgressEvent>();
    let handle = tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            info!(
                target = "fhe-bridge-cli",
                event = "progress",
                step = %event.step,
                detail = %event.detail,
                "Protocol step completed"
            );
        }
    });
    (sender, handle)
}
