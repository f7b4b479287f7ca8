use serde::{Deserialize, Serialize};

use super::{user::UserId, vote::Vote};

/// Elections are identified by a small auto-incrementing integer.
pub type ElectionId = u32;

/// The lifecycle state of an election.
///
/// The only transitions are `Unstarted -> Active -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElectionState {
    Unstarted,
    Active,
    Closed,
}

impl ElectionState {
    /// Is `next` the single legal successor of this state?
    pub fn can_become(self, next: ElectionState) -> bool {
        matches!(
            (self, next),
            (Self::Unstarted, Self::Active) | (Self::Active, Self::Closed)
        )
    }
}

/// Admin-supplied description of a new election.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// An election as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Election {
    pub id: ElectionId,
    pub name: String,
    pub description: String,
    pub state: ElectionState,
}

impl Election {
    /// A freshly created election, not yet started.
    pub fn new(id: ElectionId, spec: ElectionSpec) -> Self {
        Self {
            id,
            name: spec.name,
            description: spec.description,
            state: ElectionState::Unstarted,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == ElectionState::Active
    }
}

/// A user standing in an election. Unique per (user, election).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub user_id: UserId,
    pub election_id: ElectionId,
}

impl Candidate {
    pub fn new(user_id: impl Into<UserId>, election_id: ElectionId) -> Self {
        Self {
            user_id: user_id.into(),
            election_id,
        }
    }
}

/// A candidate as presented to clients, with the standing user's name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateDesc {
    pub user_id: UserId,
    pub name: String,
}

/// An election along with everyone standing in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionWithCandidates {
    #[serde(flatten)]
    pub election: Election,
    pub candidates: Vec<CandidateDesc>,
}

/// Everything a client needs to render the running election, read from a
/// single transaction so that the vote list and counts always agree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveElectionSnapshot {
    pub election: ElectionWithCandidates,
    pub votes: Vec<Vote>,
    pub num_eligible_voters: u64,
}
