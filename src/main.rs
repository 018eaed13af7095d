//! Sealed Query Host
//!
//! Runs the enclave core in-process and serves line-delimited JSON-RPC on
//! stdin/stdout. Logs go to stderr so stdout stays the RPC channel.
//!
//! # Environment
//!
//! - `ENCLAVE_LOG_LEVEL`: tracing level, default `info`
//! - `ENCLAVE_KEY_FILE`: raw 32-byte `key || counter` installed before serving,
//!   generated and written there first if the file does not exist
//! - `ENCLAVE_MAX_VALUES`, `ENCLAVE_MAX_VECTORS`, `ENCLAVE_CHUNK_SIZE`: limits

use anyhow::{Context, Result};
use sealed_query::config::{EnclaveConfig, HostConfig};
use sealed_query::enclave::Enclave;
use sealed_query::rpc::RpcHandler;
use sealed_query::sealer;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::FmtSubscriber;

/// Installs raw `key || counter` material from `path`, creating it if missing
fn provision_key(enclave: &mut Enclave, path: &Path) -> Result<()> {
    let (material, generated) = sealer::read_or_generate_material(path)
        .with_context(|| format!("loading key file {}", path.display()))?;
    enclave
        .install_cipher_key(Some(material.to_bytes().as_slice()))
        .map_err(|status| anyhow::anyhow!("key installation rejected: {}", status))?;
    info!(path = %path.display(), generated, "Cipher material provisioned from file");
    Ok(())
}

/// Line-delimited JSON-RPC over stdin/stdout
async fn run_stdio_server(rpc_handler: RpcHandler) -> Result<()> {
    let mut reader = BufReader::new(tokio::io::stdin());
    let mut writer = tokio::io::stdout();
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let request = line.trim();
                if request.is_empty() {
                    continue;
                }
                let response = rpc_handler.handle(request.as_bytes()).await;
                writer.write_all(&response).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
            Err(e) => {
                error!(error = %e, "Read error");
                break;
            }
        }
    }

    info!("Input closed, shutting down");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let host_config = HostConfig::from_env()?;

    let subscriber = FmtSubscriber::builder()
        .with_max_level(host_config.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Sealed Query host...");

    let config = EnclaveConfig::from_env()?;
    info!(
        max_values = config.max_values,
        max_vectors = config.max_vectors,
        chunk_size = config.chunk_size,
        "Enclave limits loaded"
    );

    let mut enclave = Enclave::with_config(config);
    match host_config.key_file.as_deref() {
        Some(path) => provision_key(&mut enclave, path)?,
        None => warn!("No key file configured; encrypted calls need enc_installCipherKey"),
    }

    let rpc_handler = RpcHandler::new(enclave);
    let result = run_stdio_server(rpc_handler.clone()).await;

    rpc_handler.enclave().lock().await.cleanup();
    result
}
