use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::{election::ElectionId, user::UserId};

/// A user's final ballot in one election: an ordered list of the candidates
/// they chose, most preferred first. Immutable once cast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub user_id: UserId,
    pub election_id: ElectionId,
    pub choices: Vec<UserId>,
}

impl Vote {
    /// Does any candidate appear more than once in the choices?
    pub fn has_duplicate_choices(choices: &[UserId]) -> bool {
        let mut seen = HashSet::with_capacity(choices.len());
        !choices.iter().all(|choice| seen.insert(choice))
    }
}
