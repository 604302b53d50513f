// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The chain and wallet capabilities a miner relies on, together with the
//! actor method parameters it sends.

#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use cid::Cid;
use fvm_ipld_encoding::{RawBytes, strict_bytes, tuple::*};
use fvm_shared4::{
    MethodNum,
    address::Address,
    clock::ChainEpoch,
    crypto::signature::Signature,
    deal::DealID,
    econ::TokenAmount,
    error::ExitCode,
    message::Message,
    piece::PaddedPieceSize,
    sector::{RegisteredSealProof, SectorNumber},
};

pub const STORAGE_MARKET_ACTOR_ADDR: Address = Address::new_id(5);

pub mod methods {
    use fvm_shared4::MethodNum;

    pub const MARKET_PUBLISH_STORAGE_DEALS: MethodNum = 4;
    pub const MINER_PRE_COMMIT_SECTOR: MethodNum = 6;
    pub const MINER_PROVE_COMMIT_SECTOR: MethodNum = 7;
}

/// Domain separation for randomness drawn from the chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum RandomnessTag {
    SealRandomness = 5,
    InteractiveSealChallengeSeed = 6,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageReceipt {
    pub exit_code: ExitCode,
    pub return_data: RawBytes,
}

/// A message receipt and the epoch of the tipset that executed it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MsgLookup {
    pub receipt: MessageReceipt,
    pub height: ChainEpoch,
}

#[async_trait]
pub trait ChainApi: Send + Sync {
    async fn chain_head(&self) -> anyhow::Result<ChainEpoch>;

    async fn get_randomness(
        &self,
        tag: RandomnessTag,
        epoch: ChainEpoch,
        entropy: &[u8],
    ) -> anyhow::Result<Vec<u8>>;

    /// Resolves once the chain has reached `epoch`.
    async fn wait_for_height(&self, epoch: ChainEpoch) -> anyhow::Result<()>;

    /// Estimates gas, signs with the `from` key and pushes `msg` to the
    /// message pool.
    async fn submit_message(&self, msg: Message) -> anyhow::Result<Cid>;

    /// Blocks until `msg` has been executed. A non-zero exit code is
    /// reported through the receipt, not as an error.
    async fn wait_for_receipt(&self, msg: Cid) -> anyhow::Result<MsgLookup>;

    async fn wallet_sign(&self, addr: &Address, data: &[u8]) -> anyhow::Result<Signature>;

    async fn wallet_has(&self, addr: &Address) -> anyhow::Result<bool>;

    async fn miner_worker(&self, miner: &Address) -> anyhow::Result<Address>;
}

/// An unsigned message with zero value. Gas fields are filled in by the
/// node on submission.
pub fn new_message(from: Address, to: Address, method_num: MethodNum, params: RawBytes) -> Message {
    Message {
        version: 0,
        from,
        to,
        sequence: 0,
        value: TokenAmount::from_atto(0),
        method_num,
        params,
        gas_limit: 0,
        gas_fee_cap: TokenAmount::from_atto(0),
        gas_premium: TokenAmount::from_atto(0),
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct PreCommitSectorParams {
    pub seal_proof: RegisteredSealProof,
    pub sector_number: SectorNumber,
    pub sealed_cid: Cid,
    pub seal_rand_epoch: ChainEpoch,
    pub deal_ids: Vec<DealID>,
    pub expiration: ChainEpoch,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct ProveCommitSectorParams {
    pub sector_number: SectorNumber,
    #[serde(with = "strict_bytes")]
    pub proof: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct DealProposal {
    pub piece_cid: Cid,
    pub piece_size: PaddedPieceSize,
    pub verified_deal: bool,
    pub client: Address,
    pub provider: Address,
    pub label: String,
    pub start_epoch: ChainEpoch,
    pub end_epoch: ChainEpoch,
    pub storage_price_per_epoch: TokenAmount,
    pub provider_collateral: TokenAmount,
    pub client_collateral: TokenAmount,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct ClientDealProposal {
    pub proposal: DealProposal,
    pub client_signature: Signature,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct PublishStorageDealsParams {
    pub deals: Vec<ClientDealProposal>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct PublishStorageDealsReturn {
    pub ids: Vec<DealID>,
}
