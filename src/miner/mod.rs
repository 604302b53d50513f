// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::{sync::Arc, time::Duration};

use anyhow::{Context as _, bail, ensure};
use async_trait::async_trait;
use fvm_ipld_encoding::RawBytes;
use fvm_shared4::{
    address::Address, commcid::data_commitment_v1_to_cid, econ::TokenAmount, error::ExitCode,
    piece::UnpaddedPieceSize, sector::SectorNumber,
};
use tokio::io::AsyncReadExt as _;
use tracing::info;

use crate::chain::{
    ChainApi, ClientDealProposal, DealProposal, PublishStorageDealsParams,
    PublishStorageDealsReturn, STORAGE_MARKET_ACTOR_ADDR, methods, new_message,
};
use crate::db::SettingsStore;
use crate::sealing::{Piece, SealingConfig, Sealing, SectorBuilder};
use crate::sector_storage::Manager;
use crate::worker::{SealRes, TaskResumer, WorkerCfg, WorkerTask};

/// A storage miner: owns the sealing pipeline of one miner actor.
pub struct Miner<DB: SettingsStore + Send + Sync + 'static> {
    chain: Arc<dyn ChainApi>,
    builder: Arc<dyn SectorBuilder>,
    sealing: Sealing<DB>,
    maddr: Address,
    worker: Address,
}

impl<DB: SettingsStore + Send + Sync + 'static> Miner<DB> {
    /// Checks that the worker key of `maddr` is available, then resumes every
    /// persisted sector.
    pub async fn run(
        db: DB,
        chain: Arc<dyn ChainApi>,
        manager: Arc<Manager>,
        builder: Arc<dyn SectorBuilder>,
        maddr: Address,
        cfg: SealingConfig,
    ) -> anyhow::Result<Self> {
        let worker = preflight_checks(chain.as_ref(), &maddr)
            .await
            .context("miner preflight checks failed")?;
        let sealing = Sealing::new(db, chain.clone(), manager, builder.clone(), maddr, worker, cfg);
        sealing.run()?;
        Ok(Self {
            chain,
            builder,
            sealing,
            maddr,
            worker,
        })
    }

    pub async fn stop(&self, timeout: Duration) -> anyhow::Result<()> {
        self.sealing.stop(timeout).await
    }

    pub fn sealing(&self) -> &Sealing<DB> {
        &self.sealing
    }

    pub fn worker(&self) -> Address {
        self.worker
    }

    /// Fills a fresh sector with a self-dealt zero piece and starts sealing
    /// it.
    pub async fn pledge_sector(&self) -> anyhow::Result<SectorNumber> {
        let size = self.sealing.config().capacity();
        let sector = self.builder.acquire_sector_id().await?;
        info!("pledging sector {sector}");
        let pieces = self.pledge_pieces(sector, vec![], &[size]).await?;
        self.sealing.new_sector(sector, pieces)?;
        Ok(sector)
    }

    async fn pledge_pieces(
        &self,
        sector: SectorNumber,
        mut existing_piece_sizes: Vec<u64>,
        sizes: &[u64],
    ) -> anyhow::Result<Vec<Piece>> {
        if sizes.is_empty() {
            return Ok(vec![]);
        }

        let head = self.chain.chain_head().await?;
        let lifetime = self.sealing.config().sector_lifetime;
        let mut comm_ps = Vec::with_capacity(sizes.len());
        let mut deals = Vec::with_capacity(sizes.len());
        for &size in sizes {
            let zeros = Box::new(tokio::io::repeat(0).take(size));
            let comm_p = self
                .builder
                .add_piece(sector, size, &existing_piece_sizes, zeros)
                .await
                .with_context(|| format!("adding pledge piece to sector {sector}"))?;
            existing_piece_sizes.push(size);

            let piece_cid = <[u8; 32]>::try_from(comm_p.as_slice())
                .map_err(|_| anyhow::anyhow!("invalid piece commitment: {} bytes", comm_p.len()))
                .and_then(|comm_p| {
                    data_commitment_v1_to_cid(&comm_p)
                        .map_err(|e| anyhow::anyhow!("invalid piece commitment: {e}"))
                })?;
            let proposal = DealProposal {
                piece_cid,
                piece_size: UnpaddedPieceSize(size).padded(),
                verified_deal: false,
                client: self.worker,
                provider: self.maddr,
                label: String::new(),
                start_epoch: head,
                end_epoch: head + lifetime,
                storage_price_per_epoch: TokenAmount::from_atto(0),
                provider_collateral: TokenAmount::from_atto(0),
                client_collateral: TokenAmount::from_atto(0),
            };
            let client_signature = self
                .chain
                .wallet_sign(&self.worker, &fvm_ipld_encoding::to_vec(&proposal)?)
                .await
                .context("signing storage deal failed")?;
            deals.push(ClientDealProposal {
                proposal,
                client_signature,
            });
            comm_ps.push(comm_p);
        }

        let params = RawBytes::serialize(&PublishStorageDealsParams { deals })
            .context("serializing PublishStorageDeals params failed")?;
        let message = self
            .chain
            .submit_message(new_message(
                self.worker,
                STORAGE_MARKET_ACTOR_ADDR,
                methods::MARKET_PUBLISH_STORAGE_DEALS,
                params,
            ))
            .await?;
        let lookup = self.chain.wait_for_receipt(message).await?;
        if lookup.receipt.exit_code != ExitCode::OK {
            bail!("publishing deal failed: exit {}", lookup.receipt.exit_code);
        }
        let ret: PublishStorageDealsReturn = lookup
            .receipt
            .return_data
            .deserialize()
            .context("decoding PublishStorageDeals return")?;
        ensure!(
            ret.ids.len() == sizes.len(),
            "got unexpected number of DealIDs from PublishStorageDeals"
        );

        Ok(ret
            .ids
            .into_iter()
            .zip(sizes)
            .zip(comm_ps)
            .map(|((deal_id, &size), comm_p)| Piece {
                deal_id,
                size,
                comm_p,
            })
            .collect())
    }
}

async fn preflight_checks(chain: &dyn ChainApi, maddr: &Address) -> anyhow::Result<Address> {
    let worker = chain.miner_worker(maddr).await?;
    let has = chain
        .wallet_has(&worker)
        .await
        .context("failed to check wallet for worker key")?;
    ensure!(has, "key for worker not found in local wallet");
    info!("starting up miner {maddr}, worker addr {worker}");
    Ok(worker)
}

#[async_trait]
impl<DB: SettingsStore + Send + Sync + 'static> TaskResumer for Miner<DB> {
    async fn worker_resume(
        &self,
        task: &WorkerTask,
        res: &SealRes,
        cfg: &WorkerCfg,
    ) -> anyhow::Result<bool> {
        Ok(self.sealing.worker_resume(task, res, cfg).await?.finished())
    }
}
