// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::atomic::{AtomicI64, Ordering};

use ahash::{HashMap, HashSet};
use anyhow::bail;
use async_trait::async_trait;
use cid::{Cid, multihash::Multihash};
use fvm_ipld_encoding::{DAG_CBOR, RawBytes};
use fvm_shared4::{
    MethodNum,
    address::Address,
    clock::ChainEpoch,
    crypto::signature::{Signature, SignatureType},
    error::ExitCode,
    message::Message,
};
use parking_lot::Mutex;

use super::{ChainApi, MessageReceipt, MsgLookup, RandomnessTag};

/// An in-memory chain. Messages execute instantly at the current head.
#[derive(Default)]
pub struct MockChain {
    pub head: AtomicI64,
    pub worker: Mutex<Option<Address>>,
    pub wallet: Mutex<HashSet<Address>>,
    pub messages: Mutex<Vec<Message>>,
    /// Exit codes to report, by method. Defaults to success.
    pub exit_codes: Mutex<HashMap<MethodNum, ExitCode>>,
    /// Return payloads to report, by method.
    pub returns: Mutex<HashMap<MethodNum, RawBytes>>,
    /// Methods whose submission fails.
    pub reject: Mutex<HashSet<MethodNum>>,
    receipts: Mutex<HashMap<Cid, MsgLookup>>,
}

impl MockChain {
    pub fn new(head: ChainEpoch) -> Self {
        let chain = Self::default();
        chain.head.store(head, Ordering::SeqCst);
        chain
    }

    pub fn submitted(&self, method: MethodNum) -> Vec<Message> {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.method_num == method)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ChainApi for MockChain {
    async fn chain_head(&self) -> anyhow::Result<ChainEpoch> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn get_randomness(
        &self,
        tag: RandomnessTag,
        epoch: ChainEpoch,
        _entropy: &[u8],
    ) -> anyhow::Result<Vec<u8>> {
        Ok(vec![(tag as i64 + epoch) as u8; 32])
    }

    async fn wait_for_height(&self, epoch: ChainEpoch) -> anyhow::Result<()> {
        self.head.fetch_max(epoch, Ordering::SeqCst);
        Ok(())
    }

    async fn submit_message(&self, msg: Message) -> anyhow::Result<Cid> {
        if self.reject.lock().contains(&msg.method_num) {
            bail!("mpool push rejected method {}", msg.method_num);
        }
        let mut messages = self.messages.lock();
        let digest = (messages.len() as u64).to_be_bytes();
        let cid = Cid::new_v1(DAG_CBOR, Multihash::wrap(0, &digest)?);
        let receipt = MessageReceipt {
            exit_code: self
                .exit_codes
                .lock()
                .get(&msg.method_num)
                .copied()
                .unwrap_or(ExitCode::OK),
            return_data: self
                .returns
                .lock()
                .get(&msg.method_num)
                .cloned()
                .unwrap_or_default(),
        };
        self.receipts.lock().insert(
            cid,
            MsgLookup {
                receipt,
                height: self.head.load(Ordering::SeqCst),
            },
        );
        messages.push(msg);
        Ok(cid)
    }

    async fn wait_for_receipt(&self, msg: Cid) -> anyhow::Result<MsgLookup> {
        match self.receipts.lock().get(&msg) {
            Some(lookup) => Ok(lookup.clone()),
            None => bail!("message {msg} not found"),
        }
    }

    async fn wallet_sign(&self, addr: &Address, data: &[u8]) -> anyhow::Result<Signature> {
        if !self.wallet.lock().contains(addr) {
            bail!("key not found for {addr}");
        }
        Ok(Signature {
            sig_type: SignatureType::Secp256k1,
            bytes: data.iter().take(65).copied().collect(),
        })
    }

    async fn wallet_has(&self, addr: &Address) -> anyhow::Result<bool> {
        Ok(self.wallet.lock().contains(addr))
    }

    async fn miner_worker(&self, miner: &Address) -> anyhow::Result<Address> {
        match *self.worker.lock() {
            Some(worker) => Ok(worker),
            None => bail!("actor not found: {miner}"),
        }
    }
}
