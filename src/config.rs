use std::sync::Arc;

use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::{
    model::{
        auth::TokenSigner,
        events::EventBus,
        mongodb::MongoStore,
        secret::{AdminPassword, VoteCode},
        store::{MemoryStore, Store},
    },
    workflow::ElectionWorkflow,
};

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. Only the state derived from it is managed.
#[derive(Deserialize)]
struct Config {
    // non-secrets
    /// Debug mode signs tokens with a fixed secret, so sessions survive restarts.
    #[serde(default)]
    debug: bool,
    // secrets
    admin_password: String,
}

/// A fairing that loads the application config and manages the secrets
/// derived from it: the token signer, the vote code, and the admin password
/// matcher.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        if config.admin_password.is_empty() {
            error!("`admin_password` must not be empty");
            return Err(rocket);
        }

        let signer = if config.debug {
            warn!("Debug mode: signing tokens with a fixed secret");
            TokenSigner::fixed()
        } else {
            TokenSigner::random()
        };
        let admin_password = AdminPassword::new(&config.admin_password);

        // Manage the state.
        rocket = rocket
            .manage(signer)
            .manage(VoteCode::random())
            .manage(admin_password);
        Ok(rocket)
    }
}

/// Configuration for the database.
#[derive(Deserialize)]
struct DbConfig {
    // secrets
    db_uri: Option<String>,
    #[serde(default = "default_db_name")]
    db_name: String,
}

fn default_db_name() -> String {
    "society_voting".to_string()
}

/// A fairing that picks a store, connecting to MongoDB if `db_uri` is set and
/// falling back to process memory otherwise, then builds the
/// [`ElectionWorkflow`] on top of it.
///
/// Must be attached after [`ConfigFairing`], whose secrets it uses.
pub struct DatabaseFairing;

#[rocket::async_trait]
impl Fairing for DatabaseFairing {
    fn info(&self) -> Info {
        Info {
            name: "Store",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<DbConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load database config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        let store: Arc<dyn Store> = match config.db_uri {
            Some(uri) => {
                info!("Loaded database config, connecting...");
                match MongoStore::connect(&uri, &config.db_name).await {
                    Ok(store) => {
                        info!("...database connection online!");
                        Arc::new(store)
                    }
                    Err(e) => {
                        error!("Failed to connect to database: {e}");
                        return Err(rocket);
                    }
                }
            }
            None => {
                warn!("No `db_uri` configured, all data will be lost on shutdown");
                Arc::new(MemoryStore::new())
            }
        };

        let (vote_code, admin_password) = match (
            rocket.state::<VoteCode>(),
            rocket.state::<AdminPassword>(),
        ) {
            (Some(code), Some(password)) => (code.clone(), password.clone()),
            _ => {
                error!("Store fairing attached before config fairing");
                return Err(rocket);
            }
        };

        // Manage the state.
        let workflow = ElectionWorkflow::new(store, EventBus::new(), vote_code, admin_password);
        rocket = rocket.manage(workflow);
        Ok(rocket)
    }
}
