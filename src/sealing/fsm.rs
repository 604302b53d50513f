// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use fvm_ipld_encoding::RawBytes;
use fvm_shared4::{
    address::Address, commcid::replica_commitment_v1_to_cid, error::ExitCode, sector::SectorNumber,
};
use tracing::{debug, info, warn};

use super::{SealSeed, SealTicket, SealingConfig, SectorEvent, SectorInfo, SectorState, events};
use crate::chain::{
    ChainApi, PreCommitSectorParams, ProveCommitSectorParams, RandomnessTag, methods, new_message,
};
use crate::metrics::{self, StateLabel};
use crate::sector_storage::Manager;
use crate::statemachine::{Context, StateHandler};
use crate::utils::{RetryArgs, retry};

type Ctx = Context<SectorNumber, SectorEvent>;

/// Drives a single sector through sealing. Each handler performs the work of
/// one state and reports the outcome as an event.
pub(super) struct SectorFsm {
    pub(super) chain: Arc<dyn ChainApi>,
    pub(super) manager: Arc<Manager>,
    pub(super) miner: Address,
    pub(super) worker: Address,
    pub(super) cfg: SealingConfig,
}

#[async_trait]
impl StateHandler for SectorFsm {
    type Id = SectorNumber;
    type State = SectorInfo;
    type Event = SectorEvent;

    fn plan(
        &self,
        id: SectorNumber,
        state: &mut SectorInfo,
        event: SectorEvent,
    ) -> anyhow::Result<()> {
        events::plan(self.cfg.capacity(), id, state, event).map_err(|e| {
            metrics::SECTOR_TRANSITION_ERRORS.inc();
            e.into()
        })
    }

    async fn handle(&self, ctx: Ctx, state: SectorInfo) -> anyhow::Result<()> {
        match state.state {
            SectorState::PreCommitting => self.handle_pre_committing(&ctx, state).await,
            SectorState::PreCommitted => self.handle_pre_committed(&ctx, state).await,
            SectorState::Committing => self.handle_committing(&ctx, state).await,
            SectorState::CommitWait => self.handle_commit_wait(&ctx, state).await,
            SectorState::SealFailed
            | SectorState::PreCommitFailed
            | SectorState::SealCommitFailed
            | SectorState::CommitFailed => {
                debug!(
                    "sector {} is {}, waiting to be resumed: {}",
                    ctx.id(),
                    state.state,
                    state.last_err
                );
                Ok(())
            }
            SectorState::Packing
            | SectorState::Proving
            | SectorState::FailedUnrecoverable => Ok(()),
        }
    }

    fn is_terminal(&self, state: &SectorInfo) -> bool {
        matches!(state.state, SectorState::Proving | SectorState::FailedUnrecoverable)
    }

    // Updates within a state, such as recording the pre-commit message, must
    // not abort worker calls in flight.
    fn supersedes(&self, from: &SectorInfo, to: &SectorInfo) -> bool {
        from.state != to.state
    }

    fn on_transition(&self, id: SectorNumber, from: &SectorInfo, to: &SectorInfo) {
        if from.state == to.state {
            return;
        }
        info!(sector = id, from = %from.state, to = %to.state, "sector state changed");
        metrics::SECTOR_STATE_TRANSITIONS
            .get_or_create(&StateLabel::new(to.state))
            .inc();
    }
}

impl SectorFsm {
    async fn ticket(&self) -> anyhow::Result<SealTicket> {
        let head = self.chain.chain_head().await?;
        let epoch = (head - self.cfg.seal_randomness_lookback).max(0);
        let ticket_bytes = self
            .chain
            .get_randomness(RandomnessTag::SealRandomness, epoch, &self.miner.to_bytes())
            .await?;
        Ok(SealTicket {
            block_height: epoch,
            ticket_bytes,
        })
    }

    async fn submit(&self, method: u64, params: RawBytes) -> anyhow::Result<cid::Cid> {
        let msg = new_message(self.worker, self.miner, method, params);
        retry(RetryArgs::default(), || self.chain.submit_message(msg.clone())).await
    }

    async fn handle_pre_committing(&self, ctx: &Ctx, info: SectorInfo) -> anyhow::Result<()> {
        if !info.comm_d.is_empty() && !info.comm_r.is_empty() {
            // commitments were recovered from a worker result
            return ctx.send(SectorEvent::Sealed {
                comm_d: info.comm_d,
                comm_r: info.comm_r,
                ticket: info.ticket,
            });
        }

        let ticket = match info.ticket.is_empty() {
            true => match self.ticket().await {
                Ok(ticket) => ticket,
                Err(e) => {
                    return ctx.send(SectorEvent::SealFailed {
                        err: format!("getting ticket failed: {e:#}"),
                    });
                }
            },
            false => info.ticket,
        };
        let out = self
            .manager
            .seal_pre_commit(ctx.id(), ticket.clone(), info.pieces)
            .await;
        ctx.send(match out {
            Ok(out) => SectorEvent::Sealed {
                comm_d: out.comm_d,
                comm_r: out.comm_r,
                ticket,
            },
            Err(e) => SectorEvent::SealFailed {
                err: format!("seal pre commit failed: {e:#}"),
            },
        })
    }

    async fn handle_pre_committed(&self, ctx: &Ctx, info: SectorInfo) -> anyhow::Result<()> {
        let Some(message) = info.pre_commit_message else {
            let params = match self.pre_commit_params(ctx.id(), &info).await {
                Ok(params) => params,
                Err(e) => {
                    return ctx.send(SectorEvent::Fatal {
                        err: format!("building pre-commit params: {e:#}"),
                    });
                }
            };
            return ctx.send(match self.submit(methods::MINER_PRE_COMMIT_SECTOR, params).await {
                Ok(message) => SectorEvent::PreCommitted { message },
                Err(e) => SectorEvent::PreCommitFailed {
                    err: format!("pushing message to mpool: {e:#}"),
                },
            });
        };

        let lookup = match self.chain.wait_for_receipt(message).await {
            Ok(lookup) => lookup,
            Err(e) => {
                return ctx.send(SectorEvent::PreCommitFailed {
                    err: format!("failed to wait for pre-commit message: {e:#}"),
                });
            }
        };
        if lookup.receipt.exit_code != ExitCode::OK {
            return ctx.send(SectorEvent::Fatal {
                err: format!(
                    "sector {} pre-commit failed: exit {}",
                    ctx.id(),
                    lookup.receipt.exit_code
                ),
            });
        }

        let seed_height = lookup.height + self.cfg.pre_commit_challenge_delay;
        debug!(
            "sector {} waiting for seed at epoch {seed_height} (+{} confidence)",
            ctx.id(),
            self.cfg.interactive_porep_confidence
        );
        let seed = async {
            self.chain
                .wait_for_height(seed_height + self.cfg.interactive_porep_confidence)
                .await?;
            self.chain
                .get_randomness(
                    RandomnessTag::InteractiveSealChallengeSeed,
                    seed_height,
                    &self.miner.to_bytes(),
                )
                .await
        };
        ctx.send(match seed.await {
            Ok(ticket_bytes) => SectorEvent::SeedReady {
                seed: SealSeed {
                    block_height: seed_height,
                    ticket_bytes,
                },
            },
            Err(e) => SectorEvent::PreCommitFailed {
                err: format!("failed to get seed: {e:#}"),
            },
        })
    }

    async fn pre_commit_params(
        &self,
        sector: SectorNumber,
        info: &SectorInfo,
    ) -> anyhow::Result<RawBytes> {
        let comm_r = <[u8; 32]>::try_from(info.comm_r.as_slice())
            .map_err(|_| anyhow::anyhow!("invalid CommR: {} bytes", info.comm_r.len()))?;
        let sealed_cid = replica_commitment_v1_to_cid(&comm_r)
            .map_err(|e| anyhow::anyhow!("invalid CommR: {e}"))?;
        let head = self.chain.chain_head().await?;
        let params = PreCommitSectorParams {
            seal_proof: self.cfg.seal_proof(),
            sector_number: sector,
            sealed_cid,
            seal_rand_epoch: info.ticket.block_height,
            deal_ids: info.deal_ids(),
            expiration: head + self.cfg.sector_lifetime,
        };
        RawBytes::serialize(&params).context("serializing pre-commit params")
    }

    async fn handle_committing(&self, ctx: &Ctx, info: SectorInfo) -> anyhow::Result<()> {
        let proof = match info.proof.is_empty() {
            true => {
                let rspco = info.pre_commit_output();
                match self
                    .manager
                    .seal_commit(ctx.id(), info.ticket, info.seed, info.pieces, rspco)
                    .await
                {
                    Ok(proof) => proof,
                    Err(e) => {
                        return ctx.send(SectorEvent::SealCommitFailed {
                            err: format!("computing seal proof failed: {e:#}"),
                        });
                    }
                }
            }
            false => info.proof,
        };

        let params = RawBytes::serialize(&ProveCommitSectorParams {
            sector_number: ctx.id(),
            proof: proof.clone(),
        })
        .context("serializing commit params")?;
        ctx.send(match self.submit(methods::MINER_PROVE_COMMIT_SECTOR, params).await {
            Ok(message) => SectorEvent::Committed { proof, message },
            Err(e) => SectorEvent::CommitFailed {
                err: format!("pushing message to mpool: {e:#}"),
                proof,
            },
        })
    }

    async fn handle_commit_wait(&self, ctx: &Ctx, info: SectorInfo) -> anyhow::Result<()> {
        let Some(message) = info.commit_message else {
            warn!("sector {} entered commit wait without a message", ctx.id());
            return ctx.send(SectorEvent::CommitFailed {
                err: "no commit message".into(),
                proof: vec![],
            });
        };
        ctx.send(match self.chain.wait_for_receipt(message).await {
            Ok(lookup) if lookup.receipt.exit_code == ExitCode::OK => SectorEvent::Proving,
            Ok(lookup) => SectorEvent::CommitFailed {
                err: format!(
                    "submitting sector proof failed (exit={}, msg={message})",
                    lookup.receipt.exit_code
                ),
                proof: vec![],
            },
            Err(e) => SectorEvent::CommitFailed {
                err: format!("failed to wait for porep inclusion: {e:#}"),
                proof: vec![],
            },
        })
    }
}
