//! Every operation that touches persistent state.
//!
//! Each public method runs inside exactly one store transaction. The
//! transaction is committed only if the whole operation succeeded and is
//! rolled back before any error is returned, so a failed call leaves no trace.
//! Notifications go out strictly after a successful commit.

use std::{collections::HashSet, sync::Arc};

use rocket::tokio::task;

use crate::{
    error::{Error, Result},
    model::{
        auth::{Principal, ADMIN_ID},
        election::{
            ActiveElectionSnapshot, Candidate, CandidateDesc, Election, ElectionId, ElectionSpec,
            ElectionState, ElectionWithCandidates,
        },
        events::{EventBus, Notification},
        secret::{AdminPassword, VoteCode},
        store::{Store, StoreError, Transaction},
        user::{check_user_id, normalise_name, User, UserDesc, UserId},
        vote::Vote,
    },
};

/// Display name reported for the admin principal, which has no stored user.
pub const ADMIN_NAME: &str = "Administrator";

#[derive(Clone)]
pub struct ElectionWorkflow {
    store: Arc<dyn Store>,
    events: EventBus,
    vote_code: VoteCode,
    admin_password: AdminPassword,
}

/// Commit on success, roll back on failure.
async fn finish<T>(tx: Box<dyn Transaction>, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            tx.commit()
                .await
                .map_err(|e| race_as_conflict(e, "A concurrent change got there first, try again"))?;
            Ok(value)
        }
        Err(err) => {
            if let Err(e) = tx.rollback().await {
                warn!("Failed to roll back transaction: {e}");
            }
            Err(err)
        }
    }
}

/// Like the plain conversion, but with a message specific to the race lost.
fn race_as_conflict(err: StoreError, msg: &str) -> Error {
    match err {
        StoreError::Duplicate | StoreError::WriteConflict => Error::conflict(msg),
        other => {
            error!("Store failure: {other}");
            other.into()
        }
    }
}

/// Run CPU-bound work, such as password hashing, off the async workers.
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Internal(format!("Blocking task failed: {e}")))
}

/// Look up a user, reporting a missing one as `missing`.
async fn require_user(tx: &mut dyn Transaction, id: &str, missing: Error) -> Result<User> {
    match tx.get_user(id).await {
        Ok(user) => Ok(user),
        Err(StoreError::NotFound) => Err(missing),
        Err(e) => Err(e.into()),
    }
}

async fn require_election(tx: &mut dyn Transaction, id: ElectionId) -> Result<Election> {
    match tx.get_election(id).await {
        Ok(election) => Ok(election),
        Err(StoreError::NotFound) => Err(Error::not_found(format!("Election {id}"))),
        Err(e) => Err(e.into()),
    }
}

/// The active election, if any.
async fn find_active(tx: &mut dyn Transaction) -> Result<Option<Election>> {
    match tx.active_election().await {
        Ok(election) => Ok(Some(election)),
        Err(StoreError::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn describe_candidates(
    tx: &mut dyn Transaction,
    election_id: ElectionId,
) -> Result<Vec<CandidateDesc>> {
    let candidates = tx.candidates_for_election(election_id).await?;
    let mut descs = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        match tx.get_user(&candidate.user_id).await {
            Ok(user) => descs.push(CandidateDesc {
                user_id: user.id,
                name: user.name,
            }),
            // Candidacies go with their user, so this is only a stale read.
            Err(StoreError::NotFound) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(descs)
}

impl ElectionWorkflow {
    pub fn new(
        store: Arc<dyn Store>,
        events: EventBus,
        vote_code: VoteCode,
        admin_password: AdminPassword,
    ) -> Self {
        Self {
            store,
            events,
            vote_code,
            admin_password,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn vote_code(&self) -> &VoteCode {
        &self.vote_code
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.store.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {e}");
            e.into()
        })
    }

    // Users

    /// Log in, registering the user on their first visit.
    pub async fn login(&self, user_id: &str, password: &str) -> Result<Principal> {
        if user_id == ADMIN_ID {
            return if self.admin_password.check(password) {
                info!("Admin logged in");
                Ok(Principal::admin())
            } else {
                Err(Error::Unauthenticated)
            };
        }
        check_user_id(user_id)?;

        let mut tx = self.begin().await?;
        let result = match tx.get_user(user_id).await {
            Ok(user) => Ok(Some(user)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        };
        let existing = finish(tx, result).await?;

        match existing {
            Some(user) => {
                let password = password.to_string();
                if !blocking(move || user.verify_password(password)).await? {
                    return Err(Error::Unauthenticated);
                }
            }
            None => self.register(user_id, password).await?,
        }
        Ok(Principal::regular(user_id))
    }

    async fn register(&self, user_id: &str, password: &str) -> Result<()> {
        if password.is_empty() {
            return Err(Error::Validation("Password cannot be empty".to_string()));
        }
        // Hash before opening the transaction, which may hold the whole store.
        let user = {
            let id = user_id.to_string();
            let password = password.to_string();
            blocking(move || User::register(id, &password)).await??
        };

        let mut tx = self.begin().await?;
        let result = tx
            .insert_user(&user)
            .await
            .map_err(|e| race_as_conflict(e, "User registered concurrently, try again"));
        finish(tx, result).await?;
        info!("Registered new user {user_id}");
        Ok(())
    }

    /// The caller's own record.
    pub async fn me(&self, principal: &Principal) -> Result<UserDesc> {
        if principal.is_admin() {
            return Ok(UserDesc {
                id: ADMIN_ID.to_string(),
                name: ADMIN_NAME.to_string(),
            });
        }
        let mut tx = self.begin().await?;
        let result = require_user(tx.as_mut(), &principal.id, Error::Unauthenticated)
            .await
            .map(|user| user.desc());
        finish(tx, result).await
    }

    pub async fn set_name(&self, user_id: &str, name: &str) -> Result<UserDesc> {
        let name = normalise_name(name)?;
        let mut tx = self.begin().await?;
        let result = match tx.set_user_name(user_id, &name).await {
            Ok(()) => Ok(UserDesc {
                id: user_id.to_string(),
                name,
            }),
            Err(StoreError::NotFound) => Err(Error::Unauthenticated),
            Err(e) => Err(e.into()),
        };
        finish(tx, result).await
    }

    /// Remove a user and their candidacies. Votes they cast are kept.
    pub async fn delete_user(&self, user_id: &str) -> Result<()> {
        let mut tx = self.begin().await?;
        let result = match tx.delete_user(user_id).await {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound) => Err(Error::not_found(format!("User {user_id}"))),
            Err(e) => Err(e.into()),
        };
        finish(tx, result).await?;
        info!("Deleted user {user_id}");
        Ok(())
    }

    // Reads

    pub async fn list_elections(&self) -> Result<Vec<ElectionWithCandidates>> {
        let mut tx = self.begin().await?;
        let result = Self::list_in(tx.as_mut()).await;
        finish(tx, result).await
    }

    async fn list_in(tx: &mut dyn Transaction) -> Result<Vec<ElectionWithCandidates>> {
        let elections = tx.all_elections().await?;
        let mut listed = Vec::with_capacity(elections.len());
        for election in elections {
            let candidates = describe_candidates(tx, election.id).await?;
            listed.push(ElectionWithCandidates {
                election,
                candidates,
            });
        }
        Ok(listed)
    }

    /// The active election with its candidates, votes and electorate size, as
    /// of a single point in time.
    pub async fn active_election_snapshot(&self) -> Result<ActiveElectionSnapshot> {
        let mut tx = self.begin().await?;
        let result = Self::snapshot_in(tx.as_mut()).await;
        finish(tx, result).await
    }

    async fn snapshot_in(tx: &mut dyn Transaction) -> Result<ActiveElectionSnapshot> {
        let election = find_active(tx)
            .await?
            .ok_or_else(|| Error::NotFound("There is no active election".to_string()))?;
        let candidates = describe_candidates(tx, election.id).await?;
        let votes = tx.votes_for_election(election.id).await?;
        let num_eligible_voters = tx.count_users().await?;
        Ok(ActiveElectionSnapshot {
            election: ElectionWithCandidates {
                election,
                candidates,
            },
            votes,
            num_eligible_voters,
        })
    }

    // Election lifecycle

    pub async fn create_election(&self, spec: ElectionSpec) -> Result<Election> {
        let spec = ElectionSpec {
            name: spec.name.trim().to_string(),
            description: spec.description.trim().to_string(),
        };
        if spec.name.is_empty() {
            return Err(Error::Validation("Election name cannot be empty".to_string()));
        }

        let mut tx = self.begin().await?;
        let result = tx
            .insert_election(spec)
            .await
            .map_err(|e| race_as_conflict(e, "Another election was created concurrently, try again"));
        let election = finish(tx, result).await?;
        info!("Created election {} ({})", election.id, election.name);
        Ok(election)
    }

    /// Delete an election that is not running, with its candidacies and votes.
    pub async fn delete_election(&self, id: ElectionId) -> Result<()> {
        let mut tx = self.begin().await?;
        let result = Self::delete_election_in(tx.as_mut(), id).await;
        finish(tx, result).await?;
        info!("Deleted election {id}");
        Ok(())
    }

    async fn delete_election_in(tx: &mut dyn Transaction, id: ElectionId) -> Result<()> {
        let election = require_election(tx, id).await?;
        if election.is_active() {
            return Err(Error::conflict(
                "Cannot delete a running election, stop it first",
            ));
        }
        tx.delete_election(id).await?;
        Ok(())
    }

    pub async fn start_election(&self, id: ElectionId) -> Result<()> {
        let mut tx = self.begin().await?;
        let result = Self::start_in(tx.as_mut(), id).await;
        finish(tx, result).await?;
        info!("Started election {id}");
        self.events
            .notify(Notification::ElectionStarted { election_id: id });
        Ok(())
    }

    async fn start_in(tx: &mut dyn Transaction, id: ElectionId) -> Result<()> {
        let election = require_election(tx, id).await?;
        if !election.state.can_become(ElectionState::Active) {
            return Err(Error::Conflict(format!(
                "Election {id} has already been started"
            )));
        }
        if let Some(active) = find_active(tx).await? {
            return Err(Error::Conflict(format!(
                "Election {} is already running",
                active.id
            )));
        }
        tx.set_election_state(id, ElectionState::Active)
            .await
            .map_err(|e| race_as_conflict(e, "Another election is already running"))
    }

    pub async fn stop_election(&self, id: ElectionId) -> Result<()> {
        let mut tx = self.begin().await?;
        let result = Self::stop_in(tx.as_mut(), id).await;
        finish(tx, result).await?;
        info!("Stopped election {id}");
        self.events
            .notify(Notification::ElectionStopped { election_id: id });
        Ok(())
    }

    async fn stop_in(tx: &mut dyn Transaction, id: ElectionId) -> Result<()> {
        let election = require_election(tx, id).await?;
        if !election.state.can_become(ElectionState::Closed) {
            return Err(Error::Conflict(format!("Election {id} is not running")));
        }
        tx.set_election_state(id, ElectionState::Closed)
            .await
            .map_err(|e| race_as_conflict(e, "Election state changed concurrently"))
    }

    // Candidacy

    pub async fn stand(&self, user_id: &str, election_id: ElectionId) -> Result<()> {
        let mut tx = self.begin().await?;
        let result = Self::stand_in(tx.as_mut(), user_id, election_id).await;
        finish(tx, result).await?;
        info!("User {user_id} is standing in election {election_id}");
        Ok(())
    }

    async fn stand_in(
        tx: &mut dyn Transaction,
        user_id: &str,
        election_id: ElectionId,
    ) -> Result<()> {
        let user = require_user(tx, user_id, Error::Unauthenticated).await?;
        let election = require_election(tx, election_id).await?;
        tx.insert_candidate(&Candidate::new(user.id, election.id))
            .await
            .map_err(|e| race_as_conflict(e, "You are already standing in this election"))
    }

    /// Withdraw the caller's own candidacy.
    pub async fn withdraw(&self, user_id: &str, election_id: ElectionId) -> Result<()> {
        self.remove_candidacy(user_id, election_id, Error::Unauthenticated)
            .await
    }

    /// Withdraw somebody else's candidacy, as an admin.
    pub async fn withdraw_user(&self, target: &str, election_id: ElectionId) -> Result<()> {
        self.remove_candidacy(target, election_id, Error::not_found(format!("User {target}")))
            .await
    }

    async fn remove_candidacy(
        &self,
        user_id: &str,
        election_id: ElectionId,
        missing_user: Error,
    ) -> Result<()> {
        let mut tx = self.begin().await?;
        let result = Self::withdraw_in(tx.as_mut(), user_id, election_id, missing_user).await;
        finish(tx, result).await?;
        info!("User {user_id} withdrew from election {election_id}");
        Ok(())
    }

    async fn withdraw_in(
        tx: &mut dyn Transaction,
        user_id: &str,
        election_id: ElectionId,
        missing_user: Error,
    ) -> Result<()> {
        let user = require_user(tx, user_id, missing_user).await?;
        match tx
            .delete_candidate(&Candidate::new(user.id, election_id))
            .await
        {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound) => Err(Error::NotFound(format!(
                "{user_id} is not standing in election {election_id}"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    // Voting

    /// Cast a ballot in the running election. `choices` are candidates' user
    /// IDs in order of preference.
    pub async fn cast_vote(
        &self,
        user_id: &str,
        election_id: ElectionId,
        choices: Vec<UserId>,
        code: &str,
    ) -> Result<()> {
        if !self.vote_code.check(code) {
            return Err(Error::Forbidden("Incorrect vote code".to_string()));
        }
        if Vote::has_duplicate_choices(&choices) {
            return Err(Error::Validation(
                "Each candidate may only be chosen once".to_string(),
            ));
        }

        let vote = Vote {
            user_id: user_id.to_string(),
            election_id,
            choices,
        };
        let mut tx = self.begin().await?;
        let result = Self::vote_in(tx.as_mut(), &vote).await;
        finish(tx, result).await?;
        debug!("User {user_id} voted in election {election_id}");
        self.events
            .notify(Notification::VoteReceived { election_id });
        Ok(())
    }

    async fn vote_in(tx: &mut dyn Transaction, vote: &Vote) -> Result<()> {
        // Users deleted since logging in can no longer vote.
        require_user(tx, &vote.user_id, Error::Unauthenticated).await?;

        let active = find_active(tx)
            .await?
            .ok_or_else(|| Error::conflict("There is no running election to vote in"))?;
        if active.id != vote.election_id {
            return Err(Error::Conflict(format!(
                "Election {} is not running",
                vote.election_id
            )));
        }
        if tx.has_voted(&vote.user_id, active.id).await? {
            return Err(Error::conflict("You have already voted in this election"));
        }

        let standing = tx
            .candidates_for_election(active.id)
            .await?
            .into_iter()
            .map(|c| c.user_id)
            .collect::<HashSet<_>>();
        if let Some(choice) = vote.choices.iter().find(|c| !standing.contains(*c)) {
            return Err(Error::Validation(format!(
                "{choice} is not standing in this election"
            )));
        }

        tx.insert_vote(vote)
            .await
            .map_err(|e| race_as_conflict(e, "You have already voted in this election"))
    }
}
