// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fvm_shared4::sector::SectorNumber;

use super::SectorState;

#[derive(Debug, thiserror::Error)]
pub enum SealingError {
    #[error("sector {0} has no pieces")]
    NoPieces(SectorNumber),
    #[error("pieces of sector {sector} take {size} bytes, the sector holds {capacity}")]
    PiecesExceedSector {
        sector: SectorNumber,
        size: u64,
        capacity: u64,
    },
    #[error("{field} of sector {sector} is empty")]
    EmptyCommitment {
        sector: SectorNumber,
        field: &'static str,
    },
    #[error("{field} of sector {sector} is already set to a different value")]
    ImmutableField {
        sector: SectorNumber,
        field: &'static str,
    },
    #[error("sector {sector} cannot handle {event} in state {state}")]
    UnexpectedEvent {
        sector: SectorNumber,
        state: SectorState,
        event: &'static str,
    },
    #[error("sector {0} not found")]
    UnknownSector(SectorNumber),
    #[error("cannot allocate unpadded piece of {0} bytes")]
    UnpaddedPiece(u64),
    #[error("piece of {size} bytes cannot fit into a {sector_size} byte sector")]
    PieceTooLarge { size: u64, sector_size: u64 },
}
