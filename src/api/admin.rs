use rocket::{http::Status, response::stream::EventStream, serde::json::Json, Route, Shutdown, State};
use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    model::{
        auth::{Admin, AuthToken},
        election::{Election, ElectionSpec},
        events::Topic,
        user::UserId,
    },
    workflow::ElectionWorkflow,
};

use super::election::{notification_stream, ElectionRef};

pub fn routes() -> Vec<Route> {
    routes![
        create_election,
        delete_election,
        vote_events,
        start_election,
        stop_election,
        delete_user,
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRef {
    #[serde(rename = "userID")]
    pub user_id: UserId,
}

#[post("/api/admin/election", data = "<spec>", format = "json")]
async fn create_election(
    _token: AuthToken<Admin>,
    spec: Json<ElectionSpec>,
    workflow: &State<ElectionWorkflow>,
) -> Result<Json<Election>> {
    let election = workflow.create_election(spec.into_inner()).await?;
    Ok(Json(election))
}

#[delete("/api/admin/election", data = "<election>", format = "json")]
async fn delete_election(
    _token: AuthToken<Admin>,
    election: Json<ElectionRef>,
    workflow: &State<ElectionWorkflow>,
) -> Result<Status> {
    workflow.delete_election(election.id).await?;
    Ok(Status::NoContent)
}

#[get("/api/admin/election/sse")]
fn vote_events(
    _token: AuthToken<Admin>,
    workflow: &State<ElectionWorkflow>,
    shutdown: Shutdown,
) -> EventStream![] {
    notification_stream(workflow.events().subscribe(Topic::VoteReceived), shutdown)
}

#[post("/api/admin/election/start", data = "<election>", format = "json")]
async fn start_election(
    _token: AuthToken<Admin>,
    election: Json<ElectionRef>,
    workflow: &State<ElectionWorkflow>,
) -> Result<Status> {
    workflow.start_election(election.id).await?;
    Ok(Status::NoContent)
}

#[post("/api/admin/election/stop", data = "<election>", format = "json")]
async fn stop_election(
    _token: AuthToken<Admin>,
    election: Json<ElectionRef>,
    workflow: &State<ElectionWorkflow>,
) -> Result<Status> {
    workflow.stop_election(election.id).await?;
    Ok(Status::NoContent)
}

#[delete("/api/admin/user/delete", data = "<user>", format = "json")]
async fn delete_user(
    _token: AuthToken<Admin>,
    user: Json<UserRef>,
    workflow: &State<ElectionWorkflow>,
) -> Result<Status> {
    workflow.delete_user(&user.user_id).await?;
    Ok(Status::NoContent)
}

#[cfg(test)]
mod tests {
    use rocket::{http::ContentType, local::asynchronous::Client, serde::json::serde_json::json};

    use super::*;
    use crate::{
        model::{election::ElectionState, events::Notification},
        TEST_VOTER_ID,
    };

    fn workflow(client: &Client) -> &ElectionWorkflow {
        client.rocket().state::<ElectionWorkflow>().unwrap()
    }

    async fn create(client: &Client, spec: &ElectionSpec) -> Election {
        let response = client
            .post(uri!(create_election))
            .header(ContentType::JSON)
            .body(json!(spec).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        response.into_json().await.unwrap()
    }

    async fn start(client: &Client, id: u32) -> Status {
        client
            .post(uri!(start_election))
            .header(ContentType::JSON)
            .body(json!({ "id": id }).to_string())
            .dispatch()
            .await
            .status()
    }

    async fn stop(client: &Client, id: u32) -> Status {
        client
            .post(uri!(stop_election))
            .header(ContentType::JSON)
            .body(json!({ "id": id }).to_string())
            .dispatch()
            .await
            .status()
    }

    #[backend_test(admin)]
    async fn create_and_list(client: Client) {
        let election = create(&client, &ElectionSpec::example()).await;
        assert_eq!(election.name, ElectionSpec::example().name);
        assert_eq!(election.state, ElectionState::Unstarted);

        let listed = workflow(&client).list_elections().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].election, election);
    }

    #[backend_test(admin)]
    async fn create_without_name(client: Client) {
        let response = client
            .post(uri!(create_election))
            .header(ContentType::JSON)
            .body(json!({ "name": " ", "description": "" }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::BadRequest, response.status());
    }

    #[backend_test(voter)]
    async fn voters_cannot_administer(client: Client) {
        let id = workflow(&client)
            .create_election(ElectionSpec::example())
            .await
            .unwrap()
            .id;

        let response = client
            .post(uri!(create_election))
            .header(ContentType::JSON)
            .body(json!(ElectionSpec::example()).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Unauthorized, response.status());
        assert_eq!(Status::Unauthorized, start(&client, id).await);
        assert_eq!(workflow(&client).list_elections().await.unwrap().len(), 1);
    }

    #[backend_test]
    async fn anonymous_cannot_administer(client: Client) {
        assert_eq!(Status::Unauthorized, start(&client, 1).await);
        let response = client.get(uri!(vote_events)).dispatch().await;
        assert_eq!(Status::Unauthorized, response.status());
    }

    #[backend_test(admin)]
    async fn one_election_at_a_time(client: Client) {
        let e1 = create(&client, &ElectionSpec::example()).await;
        let e2 = create(&client, &ElectionSpec::example2()).await;
        let mut events = workflow(&client)
            .events()
            .subscribe(Topic::ElectionLifecycle);

        assert_eq!(Status::NoContent, start(&client, e1.id).await);
        assert_eq!(
            events.recv().await,
            Some(Notification::ElectionStarted { election_id: e1.id })
        );
        assert_eq!(Status::Conflict, start(&client, e2.id).await);
        assert_eq!(Status::Conflict, start(&client, e1.id).await);

        assert_eq!(Status::NoContent, stop(&client, e1.id).await);
        assert_eq!(
            events.recv().await,
            Some(Notification::ElectionStopped { election_id: e1.id })
        );
        assert_eq!(Status::Conflict, stop(&client, e1.id).await);
        assert_eq!(Status::NoContent, start(&client, e2.id).await);

        assert_eq!(Status::NotFound, start(&client, 99).await);
    }

    #[backend_test(admin)]
    async fn delete_elections(client: Client) {
        let e1 = create(&client, &ElectionSpec::example()).await;
        let e2 = create(&client, &ElectionSpec::example2()).await;
        assert_eq!(Status::NoContent, start(&client, e1.id).await);

        let delete = |id: u32| {
            client
                .delete(uri!(delete_election))
                .header(ContentType::JSON)
                .body(json!({ "id": id }).to_string())
        };
        assert_eq!(Status::Conflict, delete(e1.id).dispatch().await.status());
        assert_eq!(Status::NoContent, delete(e2.id).dispatch().await.status());
        assert_eq!(Status::NotFound, delete(e2.id).dispatch().await.status());

        let listed = workflow(&client).list_elections().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].election.id, e1.id);
    }

    #[backend_test(admin)]
    async fn delete_users(client: Client) {
        let wf = workflow(&client);
        wf.login(TEST_VOTER_ID, "pw").await.unwrap();

        let delete = |user: &str| {
            client
                .delete(uri!(delete_user))
                .header(ContentType::JSON)
                .body(json!({ "userID": user }).to_string())
        };
        assert_eq!(
            Status::NoContent,
            delete(TEST_VOTER_ID).dispatch().await.status()
        );
        assert_eq!(
            Status::NotFound,
            delete(TEST_VOTER_ID).dispatch().await.status()
        );
    }
}
