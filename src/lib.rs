#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod workflow;

use config::{ConfigFairing, DatabaseFairing};
use logging::LoggerFairing;

/// The server, configured from `Rocket.toml` and the environment.
pub fn build() -> Rocket<Build> {
    assemble(rocket::build())
}

/// Mount routes and attach fairings. The config fairing must come before the
/// database fairing, which depends on its state.
fn assemble(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket
        .mount("/", api::routes())
        .register("/", api::catchers())
        .attach(ConfigFairing)
        .attach(DatabaseFairing)
        .attach(LoggerFairing)
}

#[cfg(test)]
pub(crate) const TEST_ADMIN_PASSWORD: &str = "correct horse battery staple";

#[cfg(test)]
pub(crate) const TEST_VOTER_ID: &str = "1234567";

#[cfg(test)]
pub(crate) const TEST_VOTER_PASSWORD: &str = "hunter2";

/// A server with a known admin password over a fresh in-memory store.
#[cfg(test)]
pub(crate) fn test_rocket() -> Rocket<Build> {
    let figment = rocket::Config::figment()
        .merge(("admin_password", TEST_ADMIN_PASSWORD))
        .merge(("debug", false));
    assemble(rocket::custom(figment))
}
