use serde::{Deserialize, Serialize};

use crate::membership::{sort_members, Membership};
use crate::money::Money;
use crate::types::UserId;

/// what happens to the units left over by integer division
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemainderPolicy {
    /// the earliest `amount % k` members pay one extra unit each
    #[default]
    EarliestMembers,
    /// plain integer division, the remainder is never charged
    Truncate,
}

/// one member's portion of a bill
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberShare {
    pub user_id: UserId,
    pub share: Money,
}

/// split `amount` across the eligible members of a bill
///
/// Members are ordered by join time (ties broken by user id) before the
/// remainder is handed out, so the result is stable for a given snapshot.
/// An empty member list yields no shares.
pub fn split_amount(amount: Money, members: &[Membership], policy: RemainderPolicy) -> Vec<MemberShare> {
    let Ok(count) = u32::try_from(members.len()) else {
        return Vec::new();
    };
    let Some((base, remainder)) = amount.div_rem(count) else {
        return Vec::new();
    };

    let mut ordered = members.to_vec();
    sort_members(&mut ordered);

    let extra_slots = match policy {
        RemainderPolicy::EarliestMembers => remainder.minor(),
        RemainderPolicy::Truncate => 0,
    };

    ordered
        .into_iter()
        .enumerate()
        .map(|(idx, member)| {
            let bonus = if (idx as i64) < extra_slots { Money::ONE } else { Money::ZERO };
            MemberShare {
                user_id: member.user_id,
                share: base + bonus,
            }
        })
        .collect()
}

/// the share owed by `user_id`, if they are among the eligible members
pub fn share_of(
    user_id: UserId,
    amount: Money,
    members: &[Membership],
    policy: RemainderPolicy,
) -> Option<Money> {
    split_amount(amount, members, policy)
        .into_iter()
        .find(|s| s.user_id == user_id)
        .map(|s| s.share)
}
