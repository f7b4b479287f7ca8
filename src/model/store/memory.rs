use std::collections::BTreeMap;
use std::sync::Arc;

use rocket::tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::{
    election::{Candidate, Election, ElectionId, ElectionSpec, ElectionState},
    user::{User, UserId},
    vote::Vote,
};

use super::{Store, StoreError, StoreResult, Transaction};

#[derive(Debug, Clone, Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    elections: BTreeMap<ElectionId, Election>,
    candidates: Vec<Candidate>,
    votes: Vec<Vote>,
    last_election_id: ElectionId,
}

/// A store that lives in process memory and is lost on restart.
///
/// Transactions are fully serialized: `begin` waits until every earlier
/// transaction has finished, and works on a private copy of the tables that
/// replaces the shared one only on commit.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[rocket::async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn Transaction>> {
        let guard = self.tables.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, staged }))
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    staged: Tables,
}

#[rocket::async_trait]
impl Transaction for MemoryTransaction {
    async fn get_user(&mut self, id: &str) -> StoreResult<User> {
        self.staged
            .users
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn insert_user(&mut self, user: &User) -> StoreResult<()> {
        if self.staged.users.contains_key(&user.id) {
            return Err(StoreError::Duplicate);
        }
        self.staged.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn set_user_name(&mut self, id: &str, name: &str) -> StoreResult<()> {
        let user = self.staged.users.get_mut(id).ok_or(StoreError::NotFound)?;
        user.name = name.to_string();
        Ok(())
    }

    async fn delete_user(&mut self, id: &str) -> StoreResult<()> {
        self.staged.users.remove(id).ok_or(StoreError::NotFound)?;
        self.staged.candidates.retain(|c| c.user_id != id);
        Ok(())
    }

    async fn count_users(&mut self) -> StoreResult<u64> {
        Ok(self.staged.users.len() as u64)
    }

    async fn all_elections(&mut self) -> StoreResult<Vec<Election>> {
        Ok(self.staged.elections.values().cloned().collect())
    }

    async fn get_election(&mut self, id: ElectionId) -> StoreResult<Election> {
        self.staged
            .elections
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn active_election(&mut self) -> StoreResult<Election> {
        self.staged
            .elections
            .values()
            .find(|e| e.is_active())
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn insert_election(&mut self, spec: ElectionSpec) -> StoreResult<Election> {
        self.staged.last_election_id += 1;
        let election = Election::new(self.staged.last_election_id, spec);
        self.staged.elections.insert(election.id, election.clone());
        Ok(election)
    }

    async fn set_election_state(
        &mut self,
        id: ElectionId,
        state: ElectionState,
    ) -> StoreResult<()> {
        if state == ElectionState::Active
            && self
                .staged
                .elections
                .values()
                .any(|e| e.is_active() && e.id != id)
        {
            return Err(StoreError::Duplicate);
        }
        let election = self
            .staged
            .elections
            .get_mut(&id)
            .ok_or(StoreError::NotFound)?;
        election.state = state;
        Ok(())
    }

    async fn delete_election(&mut self, id: ElectionId) -> StoreResult<()> {
        self.staged
            .elections
            .remove(&id)
            .ok_or(StoreError::NotFound)?;
        self.staged.candidates.retain(|c| c.election_id != id);
        self.staged.votes.retain(|v| v.election_id != id);
        Ok(())
    }

    async fn candidates_for_election(&mut self, id: ElectionId) -> StoreResult<Vec<Candidate>> {
        Ok(self
            .staged
            .candidates
            .iter()
            .filter(|c| c.election_id == id)
            .cloned()
            .collect())
    }

    async fn insert_candidate(&mut self, candidate: &Candidate) -> StoreResult<()> {
        if self.staged.candidates.contains(candidate) {
            return Err(StoreError::Duplicate);
        }
        self.staged.candidates.push(candidate.clone());
        Ok(())
    }

    async fn delete_candidate(&mut self, candidate: &Candidate) -> StoreResult<()> {
        let index = self
            .staged
            .candidates
            .iter()
            .position(|c| c == candidate)
            .ok_or(StoreError::NotFound)?;
        self.staged.candidates.remove(index);
        Ok(())
    }

    async fn votes_for_election(&mut self, id: ElectionId) -> StoreResult<Vec<Vote>> {
        Ok(self
            .staged
            .votes
            .iter()
            .filter(|v| v.election_id == id)
            .cloned()
            .collect())
    }

    async fn has_voted(&mut self, user_id: &str, election_id: ElectionId) -> StoreResult<bool> {
        Ok(self
            .staged
            .votes
            .iter()
            .any(|v| v.user_id == user_id && v.election_id == election_id))
    }

    async fn insert_vote(&mut self, vote: &Vote) -> StoreResult<()> {
        if self.has_voted(&vote.user_id, vote.election_id).await? {
            return Err(StoreError::Duplicate);
        }
        self.staged.votes.push(vote.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTransaction { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rocket::tokio::{self, time::timeout};

    use super::*;

    async fn store_with_elections(n: usize) -> MemoryStore {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        for _ in 0..n {
            tx.insert_election(ElectionSpec::example()).await.unwrap();
        }
        tx.commit().await.unwrap();
        store
    }

    #[rocket::async_test]
    async fn commit_is_visible() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let user = User::register("1234567", "password").unwrap();
        tx.insert_user(&user).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.get_user("1234567").await.unwrap(), user);
        assert_eq!(tx.count_users().await.unwrap(), 1);
    }

    #[rocket::async_test]
    async fn rollback_and_drop_discard() {
        let store = store_with_elections(1).await;

        let mut tx = store.begin().await.unwrap();
        tx.set_election_state(1, ElectionState::Active).await.unwrap();
        tx.insert_candidate(&Candidate::new("a", 1)).await.unwrap();
        tx.rollback().await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            tx.delete_election(1).await.unwrap();
            // Dropped without committing.
        }

        let mut tx = store.begin().await.unwrap();
        let election = tx.get_election(1).await.unwrap();
        assert_eq!(election.state, ElectionState::Unstarted);
        assert!(tx.candidates_for_election(1).await.unwrap().is_empty());
        assert!(matches!(
            tx.active_election().await,
            Err(StoreError::NotFound)
        ));
    }

    #[rocket::async_test]
    async fn election_ids_increase() {
        let store = store_with_elections(2).await;
        let mut tx = store.begin().await.unwrap();
        let ids = tx
            .all_elections()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 2]);
        tx.delete_election(2).await.unwrap();
        let third = tx.insert_election(ElectionSpec::example2()).await.unwrap();
        assert_eq!(third.id, 3);
    }

    #[rocket::async_test]
    async fn single_active_election() {
        let store = store_with_elections(2).await;
        let mut tx = store.begin().await.unwrap();
        tx.set_election_state(1, ElectionState::Active).await.unwrap();
        // Re-asserting the same election is fine.
        tx.set_election_state(1, ElectionState::Active).await.unwrap();
        assert!(matches!(
            tx.set_election_state(2, ElectionState::Active).await,
            Err(StoreError::Duplicate)
        ));
        tx.set_election_state(1, ElectionState::Closed).await.unwrap();
        tx.set_election_state(2, ElectionState::Active).await.unwrap();
        assert_eq!(tx.active_election().await.unwrap().id, 2);
        assert!(matches!(
            tx.set_election_state(9, ElectionState::Closed).await,
            Err(StoreError::NotFound)
        ));
    }

    #[rocket::async_test]
    async fn unique_candidates_and_votes() {
        let store = store_with_elections(1).await;
        let mut tx = store.begin().await.unwrap();

        let candidate = Candidate::new("a", 1);
        tx.insert_candidate(&candidate).await.unwrap();
        assert!(matches!(
            tx.insert_candidate(&candidate).await,
            Err(StoreError::Duplicate)
        ));
        tx.delete_candidate(&candidate).await.unwrap();
        assert!(matches!(
            tx.delete_candidate(&candidate).await,
            Err(StoreError::NotFound)
        ));
        tx.insert_candidate(&candidate).await.unwrap();

        let vote = Vote {
            user_id: "b".to_string(),
            election_id: 1,
            choices: vec!["a".to_string()],
        };
        assert!(!tx.has_voted("b", 1).await.unwrap());
        tx.insert_vote(&vote).await.unwrap();
        assert!(tx.has_voted("b", 1).await.unwrap());
        let second = Vote {
            choices: vec![],
            ..vote
        };
        assert!(matches!(
            tx.insert_vote(&second).await,
            Err(StoreError::Duplicate)
        ));
        assert_eq!(tx.votes_for_election(1).await.unwrap().len(), 1);
    }

    #[rocket::async_test]
    async fn cascading_deletes() {
        let store = store_with_elections(2).await;
        let mut tx = store.begin().await.unwrap();
        tx.insert_user(&User::register("a", "pw").unwrap())
            .await
            .unwrap();
        tx.insert_candidate(&Candidate::new("a", 1)).await.unwrap();
        tx.insert_candidate(&Candidate::new("a", 2)).await.unwrap();
        tx.insert_vote(&Vote {
            user_id: "a".to_string(),
            election_id: 1,
            choices: vec!["a".to_string()],
        })
        .await
        .unwrap();

        tx.delete_election(1).await.unwrap();
        assert!(tx.votes_for_election(1).await.unwrap().is_empty());
        assert!(tx.candidates_for_election(1).await.unwrap().is_empty());
        assert_eq!(tx.candidates_for_election(2).await.unwrap().len(), 1);

        tx.delete_user("a").await.unwrap();
        assert!(tx.candidates_for_election(2).await.unwrap().is_empty());
        assert!(matches!(tx.delete_user("a").await, Err(StoreError::NotFound)));
    }

    #[rocket::async_test]
    async fn transactions_are_serialized() {
        let store = MemoryStore::new();
        let mut first = store.begin().await.unwrap();

        // A second transaction cannot start while the first is open.
        assert!(timeout(Duration::from_millis(50), store.begin())
            .await
            .is_err());

        let waiting = tokio::spawn({
            let store = store.clone();
            async move {
                let mut tx = store.begin().await.unwrap();
                tx.count_users().await.unwrap()
            }
        });
        first
            .insert_user(&User::register("a", "pw").unwrap())
            .await
            .unwrap();
        first.commit().await.unwrap();

        // The waiting transaction sees the committed state.
        assert_eq!(waiting.await.unwrap(), 1);
    }
}
