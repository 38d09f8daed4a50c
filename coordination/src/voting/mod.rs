//! Majority-vote label consensus
//!
//! A session collects independent labels for one pool sample. Once
//! `min_votes` are in (or the session times out) the votes are tallied:
//!
//! ```text
//! active ──quorum──▶ completed
//!   │
//!   └──timeout───▶ timed_out
//! ```

pub mod coordinator;
pub mod session;

pub use coordinator::{SharedVotingCoordinator, VotingCoordinator};
pub use session::{
    tally, SessionId, SessionStatus, Vote, VoteReceipt, VoteRequest, VotingOutcome, VotingSession,
};

/// Error type for voting operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VotingError {
    #[error("Invalid voting config: {0}")]
    InvalidConfig(String),

    #[error("Voting session not found: {0}")]
    SessionNotFound(String),

    #[error("Voting session {session_id} is {status}, not active")]
    SessionNotActive {
        session_id: String,
        status: SessionStatus,
    },

    #[error("Voter {voter_id} already voted in session {session_id}")]
    DuplicateVoter { session_id: String, voter_id: String },

    #[error("Invalid vote: {0}")]
    InvalidVote(String),

    #[error("Sample {sample_id} already has active voting session {session_id}")]
    SessionExists { sample_id: String, session_id: String },
}

/// Result type for voting operations
pub type VotingResult<T> = Result<T, VotingError>;
