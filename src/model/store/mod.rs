//! The contract between the workflow and whatever persists its data.
//!
//! Every workflow operation opens exactly one [`Transaction`], and the store
//! is responsible for making concurrent transactions behave as if they ran
//! one after another, at least as far as these constraints are concerned:
//!
//! - at most one election is `Active`;
//! - at most one candidacy per (user, election);
//! - at most one vote per (user, election).
//!
//! Violating one of these is reported as [`StoreError::Duplicate`] (or, for
//! stores that detect it that way, [`StoreError::WriteConflict`]) rather than
//! as a generic failure.

mod memory;

pub use memory::MemoryStore;

use thiserror::Error;

use super::{
    election::{Candidate, Election, ElectionId, ElectionSpec, ElectionState},
    user::User,
    vote::Vote,
};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The targeted record does not exist.
    #[error("Record not found")]
    NotFound,
    /// A uniqueness constraint would be violated.
    #[error("Uniqueness constraint violated")]
    Duplicate,
    /// A concurrent transaction touched the same data; this one was aborted.
    #[error("Transaction write conflict")]
    WriteConflict,
    #[error(transparent)]
    Db(#[from] mongodb::error::Error),
    #[error("Storage failure: {0}")]
    Other(String),
}

/// A transactional store.
#[rocket::async_trait]
pub trait Store: Send + Sync {
    /// Begin a new transaction.
    async fn begin(&self) -> StoreResult<Box<dyn Transaction>>;
}

/// One open transaction. Nothing done through it is visible to anyone else
/// until [`Transaction::commit`]; dropping it without committing discards
/// all of its effects.
#[rocket::async_trait]
pub trait Transaction: Send {
    /// Fails with `NotFound`.
    async fn get_user(&mut self, id: &str) -> StoreResult<User>;

    /// Fails with `Duplicate` if the ID is taken.
    async fn insert_user(&mut self, user: &User) -> StoreResult<()>;

    /// Fails with `NotFound`.
    async fn set_user_name(&mut self, id: &str, name: &str) -> StoreResult<()>;

    /// Delete a user and all of their candidacies. Fails with `NotFound`.
    async fn delete_user(&mut self, id: &str) -> StoreResult<()>;

    async fn count_users(&mut self) -> StoreResult<u64>;

    /// All elections, in ID order.
    async fn all_elections(&mut self) -> StoreResult<Vec<Election>>;

    /// Fails with `NotFound`.
    async fn get_election(&mut self, id: ElectionId) -> StoreResult<Election>;

    /// The single active election. Fails with `NotFound` if there is none.
    async fn active_election(&mut self) -> StoreResult<Election>;

    /// Allocate an ID and insert a new unstarted election.
    async fn insert_election(&mut self, spec: ElectionSpec) -> StoreResult<Election>;

    /// Fails with `NotFound`, or `Duplicate` if this would make a second
    /// election active.
    async fn set_election_state(&mut self, id: ElectionId, state: ElectionState)
        -> StoreResult<()>;

    /// Delete an election along with its candidacies and votes. Fails with
    /// `NotFound`.
    async fn delete_election(&mut self, id: ElectionId) -> StoreResult<()>;

    /// Candidacies for one election, in the order they were made.
    async fn candidates_for_election(&mut self, id: ElectionId) -> StoreResult<Vec<Candidate>>;

    /// Fails with `Duplicate`.
    async fn insert_candidate(&mut self, candidate: &Candidate) -> StoreResult<()>;

    /// Fails with `NotFound`.
    async fn delete_candidate(&mut self, candidate: &Candidate) -> StoreResult<()>;

    /// Votes for one election, in the order they were cast.
    async fn votes_for_election(&mut self, id: ElectionId) -> StoreResult<Vec<Vote>>;

    async fn has_voted(&mut self, user_id: &str, election_id: ElectionId) -> StoreResult<bool>;

    /// Fails with `Duplicate`.
    async fn insert_vote(&mut self, vote: &Vote) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
