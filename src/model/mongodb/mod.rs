//! The production store, backed by MongoDB multi-document transactions.
//!
//! Transactions require a replica set (or sharded cluster); a standalone
//! `mongod` will reject `start_transaction`.

mod collection;
mod counter;
mod errors;
mod store;

pub use collection::{ensure_indexes_exist, Coll, MongoCollection};
pub use counter::{ensure_election_id_counter_exists, Counter, ELECTION_ID_COUNTER_ID};
pub use errors::{error_code, translate, DUPLICATE_KEY, WRITE_CONFLICT};
pub use store::{ElectionDoc, MongoStore, UserDoc};
