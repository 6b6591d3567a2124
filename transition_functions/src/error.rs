use thiserror::Error;
use types::primitives::{CommitteeIndex, Epoch, Slot, ValidatorIndex};

/// Why a block was rejected. The pre-state survives any of these; the
/// caller simply discards the block.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
pub enum BlockRejection {
    #[error("block slot does not match state slot")]
    SlotMismatch,
    #[error("block is not newer than the latest block header")]
    BlockNotNewer,
    #[error("block names the wrong proposer")]
    WrongProposer,
    #[error("parent root does not match the latest block header")]
    ParentRootMismatch,
    #[error("proposer is slashed")]
    ProposerSlashed,
    #[error("deposit count does not match the eth1 deposit window")]
    DepositCountMismatch,
    #[error("slashing headers are not a slashable pair")]
    HeadersNotSlashable,
    #[error("validator is not slashable")]
    NotSlashable,
    #[error("attestations are not a slashable pair")]
    AttestationsNotSlashable,
    #[error("indexed attestation is malformed or carries a bad signature")]
    InvalidIndexedAttestation,
    #[error("no validator was slashed")]
    NoValidatorSlashed,
    #[error("operation names an unknown validator")]
    UnknownValidator,
    #[error("attestation committee index out of range")]
    BadCommitteeIndex,
    #[error("attestation targets the wrong epoch")]
    BadTargetEpoch,
    #[error("attestation was included outside its inclusion window")]
    BadInclusionWindow,
    #[error("attestation source does not match the justified checkpoint")]
    BadSourceCheckpoint,
    #[error("aggregation bits do not match the committee size")]
    BadAggregationBits,
    #[error("deposit proof does not verify")]
    BadDepositProof,
    #[error("exiting validator is not active")]
    ExitingValidatorNotActive,
    #[error("validator has already initiated an exit")]
    ExitAlreadyInitiated,
    #[error("the exit is not yet valid")]
    EarlyExit,
    #[error("validator has not been active long enough to exit")]
    ExitingValidatorTooYoung,
    #[error("block state root does not match the post-state")]
    StateRootMismatch,
}

/// Which signature failed. A subclass of block rejection, distinguished
/// only for logging.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
pub enum SignatureKind {
    #[error("block signature")]
    Block,
    #[error("randao reveal")]
    Randao,
    #[error("proposer slashing header signature")]
    ProposerSlashing,
    #[error("voluntary exit signature")]
    VoluntaryExit,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
pub enum Error {
    // Invariant violations. These mean the caller handed the engine a
    // malformed state or drove it out of order; the transition aborts.
    #[error("state slot {state} is not behind target slot {target}")]
    SlotAdvancePrecondition { state: Slot, target: Slot },
    #[error("epoch {0} is outside the cached shuffling window")]
    ShufflingOutOfRange(Epoch),
    #[error("committee index {index} out of range at slot {slot}")]
    CommitteeOutOfRange { slot: Slot, index: CommitteeIndex },
    #[error("proposer table does not cover slot {0}")]
    ProposerSlotOutOfRange(Slot),
    #[error("validator index {0} out of bounds")]
    ValidatorOutOfBounds(ValidatorIndex),
    #[error("a state list is at capacity")]
    ListFull,
    #[error("attester status is internally inconsistent")]
    InconsistentAttesterStatus,
    #[error("helper failure: {0:?}")]
    Helper(helper_functions::error::Error),

    // Recoverable rejections of the whole block.
    #[error("block rejected: {0}")]
    BlockInvalid(#[from] BlockRejection),
    #[error("signature rejected: {0}")]
    SignatureInvalid(SignatureKind),
}

impl From<helper_functions::error::Error> for Error {
    fn from(error: helper_functions::error::Error) -> Self {
        Error::Helper(error)
    }
}

macro_rules! ensure {
    ($condition:expr, $error:expr) => {
        if !$condition {
            return Err($error.into());
        }
    };
}

pub(crate) use ensure;
