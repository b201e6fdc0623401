//! Multi-wallet aggregation.
//!
//! Wallets are walked strictly one after another. Submitting them all at once
//! would still be correct, but every wallet would sit in the same queue and
//! the last one would wait behind all the others' retries.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use tracing::{info, warn};

use crate::error::GovernorResult;
use crate::governor::RequestGovernor;
use crate::page::Record;
use crate::query::Query;

/// Outcome for one wallet. A failure here does not affect the others.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRecords {
    pub user: String,
    pub result: GovernorResult<Vec<Record>>,
}

impl UserRecords {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Fetches every page of `template` once per user, with `user` overridden.
pub async fn fetch_all_for_users<I, S>(
    governor: &RequestGovernor,
    template: &Query,
    users: I,
) -> Vec<UserRecords>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut outcomes = Vec::new();

    for user in users {
        let user = user.into();
        let query = template.clone().user(user.clone());
        let result = governor.fetch_all(&query).await;

        match &result {
            Ok(records) => info!(user = %user, records = records.len(), "wallet fetched"),
            Err(error) => warn!(user = %user, code = error.code(), %error, "wallet fetch failed"),
        }
        outcomes.push(UserRecords { user, result });
    }

    outcomes
}

/// Serializes as `{user, count, records}` or `{user, code, error}`.
impl Serialize for UserRecords {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("user", &self.user)?;
        match &self.result {
            Ok(records) => {
                map.serialize_entry("count", &records.len())?;
                map.serialize_entry("records", records)?;
            }
            Err(error) => {
                map.serialize_entry("code", error.code())?;
                map.serialize_entry("error", &error.to_string())?;
            }
        }
        map.end()
    }
}
