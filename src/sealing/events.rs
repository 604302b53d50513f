// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use fvm_shared4::sector::SectorNumber;

use super::{Piece, SealSeed, SealTicket, SealingError, SectorInfo, SectorState};

/// Everything that can happen to a sector.
#[derive(Debug, strum::IntoStaticStr)]
pub enum SectorEvent {
    Start {
        pieces: Vec<Piece>,
    },
    Sealed {
        comm_d: Vec<u8>,
        comm_r: Vec<u8>,
        ticket: SealTicket,
    },
    SealFailed {
        err: String,
    },
    PreCommitted {
        message: Cid,
    },
    PreCommitFailed {
        err: String,
    },
    SeedReady {
        seed: SealSeed,
    },
    SealCommitFailed {
        err: String,
    },
    Committed {
        proof: Vec<u8>,
        message: Cid,
    },
    /// `proof` is whatever was computed before the failure. An empty one
    /// keeps the stored proof.
    CommitFailed {
        err: String,
        proof: Vec<u8>,
    },
    /// A commit proof that finished on a worker after the sector gave up
    /// waiting for it. An empty proof is computed again.
    ResumeCommit {
        proof: Vec<u8>,
        worker_dir: String,
    },
    RetryCommit,
    Proving,
    Fatal {
        err: String,
    },
}

/// Folds `event` into `info`. `capacity` is the number of unpadded bytes a
/// sector holds.
pub(super) fn plan(
    capacity: u64,
    sector: SectorNumber,
    info: &mut SectorInfo,
    event: SectorEvent,
) -> Result<(), SealingError> {
    use SectorState::*;

    let event_name: &'static str = (&event).into();
    match (info.state, event) {
        (Packing, SectorEvent::Start { pieces }) => {
            if pieces.is_empty() {
                return Err(SealingError::NoPieces(sector));
            }
            let size = pieces.iter().map(|p| p.size).sum::<u64>();
            if size > capacity {
                return Err(SealingError::PiecesExceedSector {
                    sector,
                    size,
                    capacity,
                });
            }
            info.sector_id = sector;
            info.pieces = pieces;
            info.state = PreCommitting;
        }

        (
            PreCommitting | PreCommitted | SealFailed | PreCommitFailed,
            SectorEvent::Sealed {
                comm_d,
                comm_r,
                ticket,
            },
        ) => {
            set_once(sector, "CommD", &mut info.comm_d, comm_d)?;
            set_once(sector, "CommR", &mut info.comm_r, comm_r)?;
            if info.comm_d.is_empty() {
                return Err(SealingError::EmptyCommitment { sector, field: "CommD" });
            }
            if info.comm_r.is_empty() {
                return Err(SealingError::EmptyCommitment { sector, field: "CommR" });
            }
            if !ticket.is_empty() {
                if info.ticket.is_empty() {
                    info.ticket = ticket;
                } else if info.ticket != ticket {
                    return Err(SealingError::ImmutableField { sector, field: "Ticket" });
                }
            }
            info.state = match info.state {
                // resumed results go through pre-commit once more
                SealFailed | PreCommitFailed => PreCommitting,
                _ => PreCommitted,
            };
        }
        (PreCommitting, SectorEvent::SealFailed { err }) => fail(info, SealFailed, err),

        (PreCommitted, SectorEvent::PreCommitted { message }) => {
            info.pre_commit_message = Some(message);
        }
        (PreCommitted, SectorEvent::PreCommitFailed { err }) => fail(info, PreCommitFailed, err),
        (PreCommitted, SectorEvent::SeedReady { seed }) => {
            if !info.seed.is_empty() && info.seed != seed {
                return Err(SealingError::ImmutableField { sector, field: "Seed" });
            }
            info.seed = seed;
            info.state = Committing;
        }

        (Committing, SectorEvent::SealCommitFailed { err }) => fail(info, SealCommitFailed, err),
        (Committing, SectorEvent::Committed { proof, message }) => {
            info.proof = proof;
            info.commit_message = Some(message);
            info.state = CommitWait;
        }
        (Committing | CommitWait, SectorEvent::CommitFailed { err, proof }) => {
            if !proof.is_empty() {
                info.proof = proof;
            }
            fail(info, CommitFailed, err)
        }
        (SealCommitFailed, SectorEvent::ResumeCommit { proof, worker_dir }) => {
            info.proof = proof;
            info.worker_dir = worker_dir;
            info.state = Committing;
        }
        (CommitFailed, SectorEvent::RetryCommit) => info.state = Committing,

        (CommitWait, SectorEvent::Proving) => {
            info.last_err.clear();
            info.state = Proving;
        }

        (state, SectorEvent::Fatal { err }) if !matches!(state, Proving | FailedUnrecoverable) => {
            fail(info, FailedUnrecoverable, err)
        }

        (state, _) => {
            return Err(SealingError::UnexpectedEvent {
                sector,
                state,
                event: event_name,
            });
        }
    }
    Ok(())
}

fn fail(info: &mut SectorInfo, state: SectorState, err: String) {
    info.last_err = err;
    info.state = state;
}

/// Commitments are written once. An empty incoming value keeps what is
/// stored.
fn set_once(
    sector: SectorNumber,
    field: &'static str,
    current: &mut Vec<u8>,
    incoming: Vec<u8>,
) -> Result<(), SealingError> {
    if incoming.is_empty() || *current == incoming {
        return Ok(());
    }
    if !current.is_empty() {
        return Err(SealingError::ImmutableField { sector, field });
    }
    *current = incoming;
    Ok(())
}
