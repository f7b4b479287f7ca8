use rocket::{
    http::Status,
    response::stream::{Event, EventStream},
    serde::json::Json,
    tokio::select,
    Route, Shutdown, State,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    model::{
        auth::{AnyRights, AuthToken, Regular},
        election::{ActiveElectionSnapshot, ElectionId, ElectionWithCandidates},
        events::{Subscription, Topic},
        user::UserId,
    },
    workflow::ElectionWorkflow,
};

pub fn routes() -> Vec<Route> {
    routes![
        list_elections,
        election_events,
        stand,
        withdraw,
        current_election,
        vote,
    ]
}

/// Request body naming a single election.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionRef {
    pub id: ElectionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub id: ElectionId,
    /// Whose candidacy to withdraw. Only admins may, and must, set this.
    #[serde(rename = "userID", default)]
    pub user_id: Option<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequest {
    pub id: ElectionId,
    /// Candidates' user IDs, most preferred first.
    pub vote: Vec<UserId>,
    pub code: String,
}

/// Relay a subscription as server-sent events until either the client goes
/// away or the server shuts down.
pub(super) fn notification_stream(
    mut subscription: Subscription,
    mut shutdown: Shutdown,
) -> EventStream![] {
    EventStream! {
        loop {
            let notification = select! {
                notification = subscription.recv() => match notification {
                    Some(notification) => notification,
                    None => break,
                },
                _ = &mut shutdown => break,
            };
            yield Event::json(&notification);
        }
    }
}

#[get("/api/election")]
async fn list_elections(
    _token: AuthToken<AnyRights>,
    workflow: &State<ElectionWorkflow>,
) -> Result<Json<Vec<ElectionWithCandidates>>> {
    let elections = workflow.list_elections().await?;
    Ok(Json(elections))
}

#[get("/api/election/sse")]
fn election_events(
    _token: AuthToken<AnyRights>,
    workflow: &State<ElectionWorkflow>,
    shutdown: Shutdown,
) -> EventStream![] {
    notification_stream(
        workflow.events().subscribe(Topic::ElectionLifecycle),
        shutdown,
    )
}

#[post("/api/election/stand", data = "<election>", format = "json")]
async fn stand(
    token: AuthToken<Regular>,
    election: Json<ElectionRef>,
    workflow: &State<ElectionWorkflow>,
) -> Result<Status> {
    workflow.stand(token.id(), election.id).await?;
    Ok(Status::NoContent)
}

#[delete("/api/election/stand", data = "<request>", format = "json")]
async fn withdraw(
    token: AuthToken<AnyRights>,
    request: Json<WithdrawRequest>,
    workflow: &State<ElectionWorkflow>,
) -> Result<Status> {
    if token.principal().is_admin() {
        let target = request
            .user_id
            .as_deref()
            .ok_or_else(|| Error::Validation("`userID` is required".to_string()))?;
        workflow.withdraw_user(target, request.id).await?;
    } else {
        workflow.withdraw(token.id(), request.id).await?;
    }
    Ok(Status::NoContent)
}

#[get("/api/election/current")]
async fn current_election(
    _token: AuthToken<AnyRights>,
    workflow: &State<ElectionWorkflow>,
) -> Result<Json<ActiveElectionSnapshot>> {
    let snapshot = workflow.active_election_snapshot().await?;
    Ok(Json(snapshot))
}

#[post("/api/election/current/vote", data = "<ballot>", format = "json")]
async fn vote(
    token: AuthToken<Regular>,
    ballot: Json<VoteRequest>,
    workflow: &State<ElectionWorkflow>,
) -> Result<Status> {
    let VoteRequest {
        id,
        vote: choices,
        code,
    } = ballot.into_inner();
    workflow.cast_vote(token.id(), id, choices, &code).await?;
    Ok(Status::NoContent)
}
