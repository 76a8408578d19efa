use crate::rpc::RpcClient;
use crate::state::{Contract, CursorRepository, Database};
use alloy_primitives::{Address, Bytes};
use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

/// Historical `eth_getCode` lookups.
#[async_trait]
pub trait CodeSource: Send + Sync {
    async fn code_at(&self, address: Address, block_number: u64) -> Result<Bytes>;
}

#[async_trait]
impl CodeSource for RpcClient {
    async fn code_at(&self, address: Address, block_number: u64) -> Result<Bytes> {
        self.get_code_at_block(address, block_number).await
    }
}

/// Binary search for the first block at which `address` has code.
pub async fn find_deployment_block<C: CodeSource + ?Sized>(
    client: &C,
    address: Address,
    latest_block: u64,
) -> Result<u64> {
    info!("Searching for deployment block of contract {:?}", address);

    let code = client.code_at(address, latest_block).await?;
    if code.is_empty() {
        anyhow::bail!("Address {:?} is not a deployed contract", address);
    }

    let mut left = 0u64;
    let mut right = latest_block;

    while left < right {
        let mid = left + (right - left) / 2;

        let code = client.code_at(address, mid).await?;

        if code.is_empty() {
            left = mid + 1;
        } else {
            right = mid;
        }
    }

    info!("Contract deployed at block {}", left);
    Ok(left)
}

/// Deployment block of `address`, looked up in the `contracts` table first.
pub async fn resolve_deployment_block<C: CodeSource + ?Sized>(
    client: &C,
    db: &Database,
    address: Address,
    latest_block: u64,
) -> Result<u64> {
    let repo = CursorRepository::new(&db.conn);
    if let Some(block) = repo.get_deployment_block(&address)? {
        return Ok(block);
    }

    let deployment_block = find_deployment_block(client, address, latest_block).await?;
    repo.insert_contract(&Contract {
        address,
        deployment_block,
    })?;
    Ok(deployment_block)
}
