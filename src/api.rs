use rocket::{
    http::{Cookie, Status},
    Catcher, Request, Route,
};

use crate::model::auth::AUTH_TOKEN_COOKIE;

mod admin;
pub mod auth;
mod election;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(auth::routes());
    routes.extend(election::routes());
    routes.extend(admin::routes());
    routes
}

pub fn catchers() -> Vec<Catcher> {
    catchers![unauthorized]
}

/// Rejected by an authentication guard. Whatever token the client sent is
/// useless, so make it forget it.
#[catch(401)]
fn unauthorized(status: Status, req: &Request) -> String {
    req.cookies().remove(Cookie::named(AUTH_TOKEN_COOKIE));
    status.reason_lossy().to_string()
}
