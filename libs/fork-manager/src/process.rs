//! Real fork-binary process and JSON-RPC client, backed by
//! `ethers::providers::{Provider, Http}` for chain RPC access.

use crate::{ForkConfig, ForkError, ForkLauncher, ForkProcess, ForkRpcClient, RpcClientFactory};
use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};

/// Launches the fork binary via `tokio::process::Command`, defaulting to the
/// `anvil`-compatible executable on `PATH`.
pub struct ProcessForkLauncher {
    binary: String,
}

impl ProcessForkLauncher {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }
}

impl Default for ProcessForkLauncher {
    fn default() -> Self {
        Self::new("anvil")
    }
}

#[async_trait]
impl ForkLauncher for ProcessForkLauncher {
    async fn spawn(&self, config: &ForkConfig) -> Result<Box<dyn ForkProcess>, ForkError> {
        let mut child = Command::new(&self.binary)
            .args(config.to_args())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ForkError::SpawnFailed(e.to_string()))?;

        let stdout = child.stdout.take().ok_or_else(|| ForkError::SpawnFailed("no stdout pipe".to_string()))?;
        Ok(Box::new(SpawnedProcess { child, stdout: BufReader::new(stdout) }))
    }
}

struct SpawnedProcess {
    child: Child,
    stdout: BufReader<ChildStdout>,
}

#[async_trait]
impl ForkProcess for SpawnedProcess {
    async fn read_until_sentinel(&mut self, sentinel: &str, timeout: Duration) -> Result<(), ForkError> {
        let scan = async {
            let mut line = String::new();
            loop {
                line.clear();
                let bytes = self.stdout.read_line(&mut line).await.map_err(|e| ForkError::SpawnFailed(e.to_string()))?;
                if bytes == 0 {
                    return Err(ForkError::SpawnFailed("fork process stdout closed before readiness".to_string()));
                }
                if line.contains(sentinel) {
                    return Ok(());
                }
            }
        };
        tokio::time::timeout(timeout, scan).await.map_err(|_| ForkError::ReadinessTimeout)?
    }

    async fn try_exit_code(&mut self) -> Option<i32> {
        self.child.try_wait().ok().flatten().and_then(|status| status.code())
    }

    async fn terminate(&mut self) -> Result<(), ForkError> {
        #[cfg(unix)]
        {
            if let Some(pid) = self.child.id() {
                // SAFETY: pid is our own child's pid, SIGTERM just requests graceful exit.
                unsafe {
                    libc::kill(pid as libc::pid_t, libc::SIGTERM);
                }
            }
        }
        #[cfg(not(unix))]
        {
            self.child.start_kill().map_err(|e| ForkError::SpawnFailed(e.to_string()))?;
        }
        Ok(())
    }

    async fn kill(&mut self) -> Result<(), ForkError> {
        self.child.start_kill().map_err(|e| ForkError::SpawnFailed(e.to_string()))?;
        let _ = self.child.wait().await;
        Ok(())
    }
}

/// Connects an `ethers` HTTP provider to the fork's local JSON-RPC endpoint
/// and issues both standard (`eth_*`) and Anvil-namespace (`anvil_*`) calls.
pub struct HttpRpcClientFactory;

#[async_trait]
impl RpcClientFactory for HttpRpcClientFactory {
    async fn connect(&self, port: u16) -> Result<std::sync::Arc<dyn ForkRpcClient>, ForkError> {
        let url = format!("http://127.0.0.1:{port}");
        let provider = Provider::<Http>::try_from(url.as_str()).map_err(|e| ForkError::Rpc(e.to_string()))?;
        Ok(std::sync::Arc::new(HttpForkRpcClient { provider }))
    }
}

struct HttpForkRpcClient {
    provider: Provider<Http>,
}

#[async_trait]
impl ForkRpcClient for HttpForkRpcClient {
    async fn chain_id(&self) -> Result<u64, ForkError> {
        self.provider.get_chainid().await.map(|id| id.as_u64()).map_err(|e| ForkError::Rpc(e.to_string()))
    }

    async fn block_number(&self) -> Result<u64, ForkError> {
        self.provider.get_block_number().await.map(|n| n.as_u64()).map_err(|e| ForkError::Rpc(e.to_string()))
    }

    async fn reset_to_block(&self, block: u64) -> Result<(), ForkError> {
        let params = serde_json::json!([{ "jsonRpcUrl": serde_json::Value::Null, "blockNumber": block }]);
        self.provider.request::<_, bool>("anvil_reset", params).await.map_err(|e| ForkError::Rpc(e.to_string()))?;
        Ok(())
    }

    async fn apply_pending_tx(&self, raw_tx: &str) -> Result<(), ForkError> {
        let tx = ethers::types::Bytes::from(hex_decode(raw_tx)?);
        self.provider.send_raw_transaction(tx).await.map_err(|e| ForkError::Rpc(e.to_string()))?;
        Ok(())
    }

    async fn get_pool_reserves(&self, pool_address: &str) -> Result<(u128, u128), ForkError> {
        // `getReserves()` selector, no arguments.
        const GET_RESERVES_SELECTOR: [u8; 4] = [0x09, 0x02, 0xf1, 0xac];
        let address: ethers::types::Address = pool_address.parse().map_err(|_| ForkError::Rpc("invalid pool address".to_string()))?;
        let call = ethers::types::TransactionRequest::new()
            .to(address)
            .data(ethers::types::Bytes::from(GET_RESERVES_SELECTOR.to_vec()));
        let typed: ethers::types::transaction::eip2718::TypedTransaction = call.into();
        let result = self.provider.call(&typed, None).await.map_err(|e| ForkError::Rpc(e.to_string()))?;
        decode_reserves(&result)
    }

    async fn create_snapshot(&self) -> Result<String, ForkError> {
        self.provider
            .request::<_, String>("evm_snapshot", ())
            .await
            .map_err(|e| ForkError::Rpc(e.to_string()))
    }

    async fn revert_to_snapshot(&self, id: &str) -> Result<bool, ForkError> {
        self.provider
            .request::<_, bool>("evm_revert", [id])
            .await
            .map_err(|e| ForkError::Rpc(e.to_string()))
    }
}

fn hex_decode(raw: &str) -> Result<Vec<u8>, ForkError> {
    let trimmed = raw.strip_prefix("0x").unwrap_or(raw);
    hex::decode(trimmed).map_err(|e| ForkError::Rpc(format!("invalid raw tx hex: {e}")))
}

fn decode_reserves(data: &ethers::types::Bytes) -> Result<(u128, u128), ForkError> {
    if data.len() < 64 {
        return Err(ForkError::Rpc("getReserves() returned fewer than 64 bytes".to_string()));
    }
    let reserve0 = u128::from_be_bytes(data[16..32].try_into().unwrap());
    let reserve1 = u128::from_be_bytes(data[48..64].try_into().unwrap());
    Ok((reserve0, reserve1))
}
