pub mod auth;
pub mod election;
pub mod events;
pub mod mongodb;
pub mod secret;
pub mod store;
pub mod user;
pub mod vote;
