use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::StoreResult;
use crate::types::{ApartmentId, UserId};

/// a user's membership of an apartment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub user_id: UserId,
    pub apartment_id: ApartmentId,
    pub joined_at: DateTime<Utc>,
}

impl Membership {
    /// snapshot rule: members count toward bills created at or after joining
    pub fn is_liable_at(&self, at: DateTime<Utc>) -> bool {
        self.joined_at <= at
    }
}

/// read side of apartment membership, owned by the apartment workflow
#[async_trait]
pub trait MembershipSource: Send + Sync {
    async fn add_member(
        &self,
        user_id: UserId,
        apartment_id: ApartmentId,
        joined_at: DateTime<Utc>,
    ) -> StoreResult<Membership>;

    /// members who joined at or before `at`, ordered by join time then user id
    async fn members_as_of(
        &self,
        apartment_id: ApartmentId,
        at: DateTime<Utc>,
    ) -> StoreResult<Vec<Membership>>;

    async fn apartments_of(&self, user_id: UserId) -> StoreResult<Vec<ApartmentId>>;
}

/// order used for remainder allocation
pub fn sort_members(members: &mut [Membership]) {
    members.sort_by(|a, b| {
        a.joined_at
            .cmp(&b.joined_at)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
}
