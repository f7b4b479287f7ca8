use mongodb::{
    bson::{doc, Bson, Document},
    error::Error as DbError,
    options::{Acknowledgment, FindOptions, ReadConcern, TransactionOptions, WriteConcern},
    Client, ClientSession, Database,
};
use rocket::futures::TryStreamExt;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::model::{
    election::{Candidate, Election, ElectionId, ElectionSpec, ElectionState},
    store::{Store, StoreError, StoreResult, Transaction},
    user::{User, UserId},
    vote::Vote,
};

use super::{
    collection::{ensure_indexes_exist, Coll, MongoCollection},
    counter::{ensure_election_id_counter_exists, Counter, ELECTION_ID_COUNTER_ID},
    errors::translate,
};

/// A user as stored in the `users` collection, keyed by their ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDoc {
    #[serde(rename = "_id")]
    pub id: UserId,
    pub name: String,
    pub password_hash: String,
}

impl From<&User> for UserDoc {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            password_hash: user.password_hash.clone(),
        }
    }
}

impl From<UserDoc> for User {
    fn from(doc: UserDoc) -> Self {
        Self {
            id: doc.id,
            name: doc.name,
            password_hash: doc.password_hash,
        }
    }
}

/// An election as stored in the `elections` collection, keyed by its ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionDoc {
    #[serde(rename = "_id")]
    pub id: ElectionId,
    pub name: String,
    pub description: String,
    pub state: ElectionState,
}

impl From<&Election> for ElectionDoc {
    fn from(election: &Election) -> Self {
        Self {
            id: election.id,
            name: election.name.clone(),
            description: election.description.clone(),
            state: election.state,
        }
    }
}

impl From<ElectionDoc> for Election {
    fn from(doc: ElectionDoc) -> Self {
        Self {
            id: doc.id,
            name: doc.name,
            description: doc.description,
            state: doc.state,
        }
    }
}

impl From<ElectionState> for Bson {
    fn from(state: ElectionState) -> Self {
        let name = match state {
            ElectionState::Unstarted => "Unstarted",
            ElectionState::Active => "Active",
            ElectionState::Closed => "Closed",
        };
        Bson::String(name.to_string())
    }
}

/// A store backed by a MongoDB database.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    db: Database,
}

impl MongoStore {
    /// Connect to the given database, creating indexes and counters as needed.
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self, DbError> {
        let client = Client::with_uri_str(uri).await?;
        let db = client.database(db_name);
        ensure_indexes_exist(&db).await?;
        ensure_election_id_counter_exists(&Coll::from_db(&db)).await?;
        Ok(Self { client, db })
    }
}

#[rocket::async_trait]
impl Store for MongoStore {
    async fn begin(&self) -> StoreResult<Box<dyn Transaction>> {
        let mut session = self.client.start_session(None).await.map_err(translate)?;
        let options = TransactionOptions::builder()
            .read_concern(ReadConcern::snapshot())
            .write_concern(WriteConcern::builder().w(Acknowledgment::Majority).build())
            .build();
        session
            .start_transaction(options)
            .await
            .map_err(translate)?;

        Ok(Box::new(MongoTransaction {
            session,
            users: Coll::from_db(&self.db),
            elections: Coll::from_db(&self.db),
            candidates: Coll::from_db(&self.db),
            votes: Coll::from_db(&self.db),
            counters: Coll::from_db(&self.db),
        }))
    }
}

/// A transaction bound to one client session. Dropping the session without
/// committing aborts the transaction server-side.
struct MongoTransaction {
    session: ClientSession,
    users: Coll<UserDoc>,
    elections: Coll<ElectionDoc>,
    candidates: Coll<Candidate>,
    votes: Coll<Vote>,
    counters: Coll<Counter>,
}

/// Run a find in the session and collect every result, in `_id` order.
async fn find_all<T>(
    coll: &Coll<T>,
    filter: Document,
    session: &mut ClientSession,
) -> StoreResult<Vec<T>>
where
    T: MongoCollection + DeserializeOwned + Unpin + Send + Sync,
{
    let options = FindOptions::builder().sort(doc! {"_id": 1}).build();
    let mut cursor = coll
        .find_with_session(filter, options, session)
        .await
        .map_err(translate)?;
    cursor
        .stream(session)
        .try_collect::<Vec<T>>()
        .await
        .map_err(translate)
}

fn candidate_filter(candidate: &Candidate) -> Document {
    doc! {"userId": candidate.user_id.as_str(), "electionId": candidate.election_id}
}

#[rocket::async_trait]
impl Transaction for MongoTransaction {
    async fn get_user(&mut self, id: &str) -> StoreResult<User> {
        self.users
            .find_one_with_session(doc! {"_id": id}, None, &mut self.session)
            .await
            .map_err(translate)?
            .map(User::from)
            .ok_or(StoreError::NotFound)
    }

    async fn insert_user(&mut self, user: &User) -> StoreResult<()> {
        self.users
            .insert_one_with_session(UserDoc::from(user), None, &mut self.session)
            .await
            .map_err(translate)?;
        Ok(())
    }

    async fn set_user_name(&mut self, id: &str, name: &str) -> StoreResult<()> {
        let result = self
            .users
            .update_one_with_session(
                doc! {"_id": id},
                doc! {"$set": {"name": name}},
                None,
                &mut self.session,
            )
            .await
            .map_err(translate)?;
        if result.matched_count == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete_user(&mut self, id: &str) -> StoreResult<()> {
        let result = self
            .users
            .delete_one_with_session(doc! {"_id": id}, None, &mut self.session)
            .await
            .map_err(translate)?;
        if result.deleted_count == 0 {
            return Err(StoreError::NotFound);
        }
        self.candidates
            .delete_many_with_session(doc! {"userId": id}, None, &mut self.session)
            .await
            .map_err(translate)?;
        Ok(())
    }

    async fn count_users(&mut self) -> StoreResult<u64> {
        self.users
            .count_documents_with_session(None, None, &mut self.session)
            .await
            .map_err(translate)
    }

    async fn all_elections(&mut self) -> StoreResult<Vec<Election>> {
        let docs = find_all(&self.elections, doc! {}, &mut self.session).await?;
        Ok(docs.into_iter().map(Election::from).collect())
    }

    async fn get_election(&mut self, id: ElectionId) -> StoreResult<Election> {
        self.elections
            .find_one_with_session(doc! {"_id": id}, None, &mut self.session)
            .await
            .map_err(translate)?
            .map(Election::from)
            .ok_or(StoreError::NotFound)
    }

    async fn active_election(&mut self) -> StoreResult<Election> {
        self.elections
            .find_one_with_session(
                doc! {"state": ElectionState::Active},
                None,
                &mut self.session,
            )
            .await
            .map_err(translate)?
            .map(Election::from)
            .ok_or(StoreError::NotFound)
    }

    async fn insert_election(&mut self, spec: ElectionSpec) -> StoreResult<Election> {
        let id =
            Counter::next_with_session(&self.counters, ELECTION_ID_COUNTER_ID, &mut self.session)
                .await?;
        let election = Election::new(id, spec);
        self.elections
            .insert_one_with_session(ElectionDoc::from(&election), None, &mut self.session)
            .await
            .map_err(translate)?;
        Ok(election)
    }

    async fn set_election_state(
        &mut self,
        id: ElectionId,
        state: ElectionState,
    ) -> StoreResult<()> {
        // The partial unique index on `state` rejects a second active election.
        let result = self
            .elections
            .update_one_with_session(
                doc! {"_id": id},
                doc! {"$set": {"state": state}},
                None,
                &mut self.session,
            )
            .await
            .map_err(translate)?;
        if result.matched_count == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete_election(&mut self, id: ElectionId) -> StoreResult<()> {
        let result = self
            .elections
            .delete_one_with_session(doc! {"_id": id}, None, &mut self.session)
            .await
            .map_err(translate)?;
        if result.deleted_count == 0 {
            return Err(StoreError::NotFound);
        }
        self.candidates
            .delete_many_with_session(doc! {"electionId": id}, None, &mut self.session)
            .await
            .map_err(translate)?;
        self.votes
            .delete_many_with_session(doc! {"electionId": id}, None, &mut self.session)
            .await
            .map_err(translate)?;
        Ok(())
    }

    async fn candidates_for_election(&mut self, id: ElectionId) -> StoreResult<Vec<Candidate>> {
        find_all(&self.candidates, doc! {"electionId": id}, &mut self.session).await
    }

    async fn insert_candidate(&mut self, candidate: &Candidate) -> StoreResult<()> {
        self.candidates
            .insert_one_with_session(candidate, None, &mut self.session)
            .await
            .map_err(translate)?;
        Ok(())
    }

    async fn delete_candidate(&mut self, candidate: &Candidate) -> StoreResult<()> {
        let result = self
            .candidates
            .delete_one_with_session(candidate_filter(candidate), None, &mut self.session)
            .await
            .map_err(translate)?;
        if result.deleted_count == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn votes_for_election(&mut self, id: ElectionId) -> StoreResult<Vec<Vote>> {
        find_all(&self.votes, doc! {"electionId": id}, &mut self.session).await
    }

    async fn has_voted(&mut self, user_id: &str, election_id: ElectionId) -> StoreResult<bool> {
        let count = self
            .votes
            .count_documents_with_session(
                doc! {"userId": user_id, "electionId": election_id},
                None,
                &mut self.session,
            )
            .await
            .map_err(translate)?;
        Ok(count > 0)
    }

    async fn insert_vote(&mut self, vote: &Vote) -> StoreResult<()> {
        self.votes
            .insert_one_with_session(vote, None, &mut self.session)
            .await
            .map_err(translate)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let mut session = self.session;
        session.commit_transaction().await.map_err(translate)
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        let mut session = self.session;
        session.abort_transaction().await.map_err(translate)
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;

    #[test]
    fn election_state_bson_matches_serde() {
        for state in [
            ElectionState::Unstarted,
            ElectionState::Active,
            ElectionState::Closed,
        ] {
            assert_eq!(Bson::from(state), mongodb::bson::to_bson(&state).unwrap());
        }
    }

    #[test]
    fn election_doc_round_trip() {
        let election = Election::new(3, ElectionSpec::example());
        let document = mongodb::bson::to_document(&ElectionDoc::from(&election)).unwrap();
        assert_eq!(document.get("state"), Some(&Bson::from(ElectionState::Unstarted)));
        let back: ElectionDoc = mongodb::bson::from_document(document).unwrap();
        assert_eq!(Election::from(back), election);
    }

    /// Connect to a scratch database on the replica set named by the
    /// `test_db_uri` config key (e.g. `ROCKET_TEST_DB_URI`). Without one, the
    /// test is skipped.
    async fn scratch_store() -> Option<MongoStore> {
        let uri = match rocket::Config::figment().extract_inner::<String>("test_db_uri") {
            Ok(uri) => uri,
            Err(_) => {
                warn!("No `test_db_uri` configured, skipping MongoDB test");
                return None;
            }
        };
        let db_name = format!("society_voting_test_{:08x}", rand::thread_rng().gen::<u32>());
        Some(MongoStore::connect(&uri, &db_name).await.unwrap())
    }

    async fn drop_store(store: MongoStore) {
        store.db.drop(None).await.unwrap();
    }

    #[rocket::async_test]
    async fn single_active_election_index() {
        let Some(store) = scratch_store().await else { return };

        let mut tx = store.begin().await.unwrap();
        let e1 = tx.insert_election(ElectionSpec::example()).await.unwrap();
        let e2 = tx.insert_election(ElectionSpec::example2()).await.unwrap();
        assert_eq!((e1.id, e2.id), (1, 2));
        tx.set_election_state(e1.id, ElectionState::Active)
            .await
            .unwrap();
        tx.set_election_state(e2.id, ElectionState::Closed)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(matches!(
            tx.set_election_state(e2.id, ElectionState::Active).await,
            Err(StoreError::Duplicate)
        ));
        tx.rollback().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.active_election().await.unwrap().id, e1.id);
        assert!(matches!(
            tx.set_election_state(99, ElectionState::Closed).await,
            Err(StoreError::NotFound)
        ));
        tx.rollback().await.unwrap();

        drop_store(store).await;
    }

    #[rocket::async_test]
    async fn unique_candidates_and_votes() {
        let Some(store) = scratch_store().await else { return };

        let mut tx = store.begin().await.unwrap();
        let election = tx.insert_election(ElectionSpec::example()).await.unwrap();
        tx.insert_user(&User::register("a", "pw").unwrap())
            .await
            .unwrap();
        let candidate = Candidate::new("a", election.id);
        tx.insert_candidate(&candidate).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(matches!(
            tx.insert_candidate(&candidate).await,
            Err(StoreError::Duplicate)
        ));
        tx.rollback().await.unwrap();

        let vote = Vote {
            user_id: "a".to_string(),
            election_id: election.id,
            choices: vec!["a".to_string()],
        };
        let mut tx = store.begin().await.unwrap();
        tx.insert_vote(&vote).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.has_voted("a", election.id).await.unwrap());
        assert!(matches!(
            tx.insert_vote(&Vote {
                choices: vec![],
                ..vote
            })
            .await,
            Err(StoreError::Duplicate)
        ));
        tx.rollback().await.unwrap();

        drop_store(store).await;
    }

    #[rocket::async_test]
    async fn rollback_discards_and_commit_publishes() {
        let Some(store) = scratch_store().await else { return };

        let mut tx = store.begin().await.unwrap();
        tx.insert_user(&User::register("a", "pw").unwrap())
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(matches!(tx.get_user("a").await, Err(StoreError::NotFound)));
        let user = User::register("b", "pw").unwrap();
        tx.insert_user(&user).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.get_user("b").await.unwrap(), user);
        assert_eq!(tx.count_users().await.unwrap(), 1);
        tx.rollback().await.unwrap();

        drop_store(store).await;
    }

    #[rocket::async_test]
    async fn concurrent_writers_conflict() {
        let Some(store) = scratch_store().await else { return };

        // Both transactions bump the same election ID counter.
        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        first
            .insert_election(ElectionSpec::example())
            .await
            .unwrap();
        assert!(matches!(
            second.insert_election(ElectionSpec::example2()).await,
            Err(StoreError::WriteConflict)
        ));
        let _ = second.rollback().await;
        first.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.all_elections().await.unwrap().len(), 1);
        tx.rollback().await.unwrap();

        drop_store(store).await;
    }
}
