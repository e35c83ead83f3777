use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use daara_core::MemberId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberRef {
    pub id: MemberId,
    pub display_name: String,
}

/// Identity directory lookup. Display only; no engine behavior depends on it.
#[async_trait]
pub trait MemberDirectory: Send + Sync {
    async fn get_member(&self, member_id: &str) -> anyhow::Result<Option<MemberRef>>;
}

pub trait ValidationAuthority: Send + Sync {
    fn caller_can_validate(&self, caller: &str) -> bool;
}

#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    members: HashMap<MemberId, String>,
}

impl StaticDirectory {
    pub fn with_member(mut self, id: impl Into<MemberId>, display_name: impl Into<String>) -> Self {
        self.members.insert(id.into(), display_name.into());
        self
    }
}

#[async_trait]
impl MemberDirectory for StaticDirectory {
    async fn get_member(&self, member_id: &str) -> anyhow::Result<Option<MemberRef>> {
        Ok(self.members.get(member_id).map(|display_name| MemberRef {
            id: member_id.to_string(),
            display_name: display_name.clone(),
        }))
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticAuthority {
    validators: HashSet<MemberId>,
}

impl StaticAuthority {
    pub fn new<I, S>(validators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<MemberId>,
    {
        Self {
            validators: validators
                .into_iter()
                .map(Into::into)
                .map(|id: MemberId| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect(),
        }
    }
}

impl ValidationAuthority for StaticAuthority {
    fn caller_can_validate(&self, caller: &str) -> bool {
        self.validators.contains(caller.trim())
    }
}
