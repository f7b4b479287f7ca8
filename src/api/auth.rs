use rocket::{
    http::{Cookie, CookieJar, Status},
    serde::json::Json,
    Route, State,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    model::{
        auth::{session_cookie, AnyRights, AuthToken, Regular, TokenSigner, AUTH_TOKEN_COOKIE},
        user::{UserDesc, UserId},
    },
    workflow::ElectionWorkflow,
};

pub fn routes() -> Vec<Route> {
    routes![login, logout, me, set_name]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    #[serde(rename = "userID")]
    pub user_id: UserId,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameRequest {
    pub name: String,
}

#[post("/auth/login", data = "<credentials>", format = "json")]
pub async fn login(
    cookies: &CookieJar<'_>,
    credentials: Json<LoginRequest>,
    workflow: &State<ElectionWorkflow>,
    signer: &State<TokenSigner>,
) -> Result<Json<UserDesc>> {
    let principal = workflow
        .login(&credentials.user_id, &credentials.password)
        .await?;
    cookies.add(session_cookie(signer.issue(&principal)));
    let me = workflow.me(&principal).await?;
    Ok(Json(me))
}

#[delete("/auth/login")]
pub fn logout(cookies: &CookieJar) -> Status {
    cookies.remove(Cookie::named(AUTH_TOKEN_COOKIE));
    Status::Ok
}

#[get("/api/me")]
pub async fn me(
    token: AuthToken<AnyRights>,
    workflow: &State<ElectionWorkflow>,
) -> Result<Json<UserDesc>> {
    let me = workflow.me(token.principal()).await?;
    Ok(Json(me))
}

#[put("/api/me/name", data = "<request>", format = "json")]
pub async fn set_name(
    token: AuthToken<Regular>,
    request: Json<NameRequest>,
    workflow: &State<ElectionWorkflow>,
) -> Result<Json<UserDesc>> {
    let me = workflow.set_name(token.id(), &request.name).await?;
    Ok(Json(me))
}

#[cfg(test)]
mod tests {
    use rocket::{http::ContentType, local::asynchronous::Client, serde::json::serde_json::json};

    use super::*;
    use crate::{
        model::auth::{RightsMask, ADMIN_ID},
        TEST_ADMIN_PASSWORD, TEST_VOTER_ID,
    };

    async fn login_as(client: &Client, user_id: &str, password: &str) -> Status {
        client
            .post(uri!(login))
            .header(ContentType::JSON)
            .body(json!({ "userID": user_id, "password": password }).to_string())
            .dispatch()
            .await
            .status()
    }

    #[backend_test]
    async fn first_login_registers(client: Client) {
        let response = client
            .post(uri!(login))
            .header(ContentType::JSON)
            .body(json!({ "userID": "2000001", "password": "pw" }).to_string())
            .dispatch()
            .await;

        assert_eq!(Status::Ok, response.status());
        let me: UserDesc = response.into_json().await.unwrap();
        assert_eq!(me.id, "2000001");
        assert_eq!(me.name, "2000001");

        let jar = client.cookies();
        let cookie = jar.get(AUTH_TOKEN_COOKIE).unwrap();
        let signer = client.rocket().state::<TokenSigner>().unwrap();
        let principal = signer.validate(cookie.value(), RightsMask::REGULAR).unwrap();
        assert_eq!(principal.id, "2000001");
    }

    #[backend_test]
    async fn wrong_password(client: Client) {
        assert_eq!(Status::Ok, login_as(&client, "2000001", "pw").await);
        client.delete(uri!(logout)).dispatch().await;

        assert_eq!(
            Status::Unauthorized,
            login_as(&client, "2000001", "not pw").await
        );
        assert_eq!(None, client.cookies().get(AUTH_TOKEN_COOKIE));
    }

    #[backend_test]
    async fn admin_login(client: Client) {
        assert_eq!(
            Status::Ok,
            login_as(&client, ADMIN_ID, TEST_ADMIN_PASSWORD).await
        );
        let jar = client.cookies();
        let cookie = jar.get(AUTH_TOKEN_COOKIE).unwrap();
        let signer = client.rocket().state::<TokenSigner>().unwrap();
        assert!(signer.validate(cookie.value(), RightsMask::ADMIN).is_some());
    }

    #[backend_test]
    async fn admin_wrong_password(client: Client) {
        assert_eq!(
            Status::Unauthorized,
            login_as(&client, ADMIN_ID, "guess").await
        );
        assert_eq!(None, client.cookies().get(AUTH_TOKEN_COOKIE));
    }

    #[backend_test]
    async fn malformed_login(client: Client) {
        let response = client
            .post(uri!(login))
            .header(ContentType::JSON)
            .body("{ not json")
            .dispatch()
            .await;
        assert!(response.status().class().is_client_error());
    }

    #[backend_test(voter)]
    async fn logout_voter(client: Client) {
        assert!(client.cookies().get(AUTH_TOKEN_COOKIE).is_some());

        let response = client.delete(uri!(logout)).dispatch().await;

        assert_eq!(Status::Ok, response.status());
        assert_eq!(None, client.cookies().get(AUTH_TOKEN_COOKIE));
    }

    #[backend_test]
    async fn logout_not_logged_in(client: Client) {
        let response = client.delete(uri!(logout)).dispatch().await;

        assert_eq!(Status::Ok, response.status());
    }

    #[backend_test(voter)]
    async fn get_me(client: Client) {
        let response = client.get(uri!(me)).dispatch().await;

        assert_eq!(Status::Ok, response.status());
        let me: UserDesc = response.into_json().await.unwrap();
        assert_eq!(me.id, TEST_VOTER_ID);
    }

    #[backend_test(admin)]
    async fn get_me_admin(client: Client) {
        let me: UserDesc = client
            .get(uri!(me))
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        assert_eq!(me.id, ADMIN_ID);
    }

    #[backend_test]
    async fn get_me_unauthenticated(client: Client) {
        let response = client.get(uri!(me)).dispatch().await;

        assert_eq!(Status::Unauthorized, response.status());
    }

    #[backend_test(voter)]
    async fn rename(client: Client) {
        let response = client
            .put(uri!(set_name))
            .header(ContentType::JSON)
            .body(json!({ "name": "  Ada Lovelace " }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        let me: UserDesc = client
            .get(uri!(me))
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        assert_eq!(me.name, "Ada Lovelace");

        let response = client
            .put(uri!(set_name))
            .header(ContentType::JSON)
            .body(json!({ "name": "" }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::BadRequest, response.status());
    }

    #[backend_test(admin)]
    async fn admin_cannot_rename(client: Client) {
        let response = client
            .put(uri!(set_name))
            .header(ContentType::JSON)
            .body(json!({ "name": "Root" }).to_string())
            .dispatch()
            .await;

        // Wrong-class tokens are rejected like missing ones, and forgotten.
        assert_eq!(Status::Unauthorized, response.status());
        assert_eq!(None, client.cookies().get(AUTH_TOKEN_COOKIE));
    }

    #[backend_test]
    async fn forged_cookie(client: Client) {
        let forged = crate::model::auth::TokenSigner::random()
            .issue(&crate::model::auth::Principal::admin());
        let response = client
            .get(uri!(me))
            .cookie(Cookie::new(AUTH_TOKEN_COOKIE, forged))
            .dispatch()
            .await;

        assert_eq!(Status::Unauthorized, response.status());
    }
}
