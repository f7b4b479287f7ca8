use mongodb::{
    bson::doc,
    error::Error as DbError,
    options::{FindOneAndUpdateOptions, ReturnDocument, UpdateOptions},
    ClientSession,
};
use serde::{Deserialize, Serialize};

use crate::model::store::{StoreError, StoreResult};

use super::{errors::translate, Coll};

/// ID of the counter that allocates election IDs.
pub const ELECTION_ID_COUNTER_ID: &str = "election_id";

/// A counter object used to implement auto-increment fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Counter {
    #[serde(rename = "_id")]
    pub id: String,
    pub next: u32,
}

impl Counter {
    /// Retrieve and increment the counter with the given ID as part of the
    /// session's transaction, so that an aborted transaction also gives the
    /// value back.
    pub async fn next_with_session(
        counters: &Coll<Counter>,
        id: &str,
        session: &mut ClientSession,
    ) -> StoreResult<u32> {
        let update = doc! {
            "$inc": { "next": 1 }
        };
        let options: FindOneAndUpdateOptions = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::Before)
            .build();
        let counter = counters
            .find_one_and_update_with_session(doc! {"_id": id}, update, options, session)
            .await
            .map_err(translate)?
            .ok_or_else(|| StoreError::Other(format!("Failed to find counter with ID {id}")))?;
        Ok(counter.next)
    }
}

/// Create the election ID counter, starting at 1, if it does not already exist.
pub async fn ensure_election_id_counter_exists(counters: &Coll<Counter>) -> Result<(), DbError> {
    let options = UpdateOptions::builder().upsert(true).build();
    counters
        .update_one(
            doc! {"_id": ELECTION_ID_COUNTER_ID},
            doc! {"$setOnInsert": {"next": 1}},
            options,
        )
        .await?;
    Ok(())
}
