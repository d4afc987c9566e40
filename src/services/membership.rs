use std::collections::HashMap;

use sqlx::PgPool;
use tokio::sync::RwLock;

use crate::config::MembershipPolicy;
use crate::models::member::{Member, MemberType};
use crate::services::name_normalize::normalize_name;

impl MembershipPolicy {
    /// Maximum member-priced tickets the given membership type allows.
    pub fn limit_for(&self, member_type: MemberType) -> i32 {
        match member_type {
            MemberType::Single => self.single,
            MemberType::Family => self.family,
            MemberType::Student => self.student,
            MemberType::Pensioner => self.pensioner,
        }
    }
}

/// Explicitly-owned cache of the member directory, keyed by normalized
/// name. Loaded once and refreshed on demand; callers that mutate the
/// members table must call `refresh`. Absence of a name is an expected
/// outcome, not an error.
pub struct MemberDirectory {
    by_name: RwLock<HashMap<String, MemberType>>,
}

impl MemberDirectory {
    pub fn new() -> Self {
        Self {
            by_name: RwLock::new(HashMap::new()),
        }
    }

    /// Re-reads the whole directory from storage. The batch trigger calls
    /// this at the start of every run so freshly imported members are
    /// visible.
    #[tracing::instrument(skip_all)]
    pub async fn refresh(&self, pool: &PgPool) -> Result<usize, sqlx::Error> {
        let members = Member::list_all(pool).await?;
        let mut map = HashMap::with_capacity(members.len());
        for m in members {
            map.insert(normalize_name(&m.name_key), m.member_type);
        }
        let count = map.len();
        *self.by_name.write().await = map;
        tracing::debug!(members = count, "member directory refreshed");
        Ok(count)
    }

    /// O(1) lookup after load. Not-found means "flag for manual review",
    /// decided by the caller.
    pub async fn resolve(&self, name: &str) -> Option<MemberType> {
        self.by_name.read().await.get(&normalize_name(name)).copied()
    }
}

impl Default for MemberDirectory {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of the membership gates for one registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipVerdict {
    /// No member tickets claimed, or claim within the type's allowance.
    Allowed { member_type: Option<MemberType> },
    /// Member tickets claimed but the name has no directory entry.
    NotFound,
    /// Directory entry exists but the claim exceeds its allowance.
    LimitExceeded { member_type: MemberType, limit: i32 },
}

/// Pure gate logic shared by preview and commit: claiming zero member
/// tickets always passes; otherwise the name must resolve and the claim
/// must stay within the type's allowance.
pub fn membership_verdict(
    claimed_member_tickets: i32,
    resolved: Option<MemberType>,
    policy: &MembershipPolicy,
) -> MembershipVerdict {
    match resolved {
        None if claimed_member_tickets > 0 => MembershipVerdict::NotFound,
        None => MembershipVerdict::Allowed { member_type: None },
        Some(member_type) => {
            let limit = policy.limit_for(member_type);
            if claimed_member_tickets > limit {
                MembershipVerdict::LimitExceeded { member_type, limit }
            } else {
                MembershipVerdict::Allowed {
                    member_type: Some(member_type),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> MembershipPolicy {
        MembershipPolicy::default()
    }

    #[test]
    fn no_member_tickets_passes_without_directory_entry() {
        assert_eq!(
            membership_verdict(0, None, &policy()),
            MembershipVerdict::Allowed { member_type: None }
        );
    }

    #[test]
    fn member_tickets_without_entry_is_not_found() {
        assert_eq!(membership_verdict(2, None, &policy()), MembershipVerdict::NotFound);
    }

    #[test]
    fn claim_at_limit_passes_claim_over_limit_fails() {
        let p = policy();
        // family default allows 6
        assert_eq!(
            membership_verdict(6, Some(MemberType::Family), &p),
            MembershipVerdict::Allowed {
                member_type: Some(MemberType::Family)
            }
        );
        assert_eq!(
            membership_verdict(7, Some(MemberType::Family), &p),
            MembershipVerdict::LimitExceeded {
                member_type: MemberType::Family,
                limit: 6
            }
        );
        // single allows exactly 1
        assert_eq!(
            membership_verdict(1, Some(MemberType::Single), &p),
            MembershipVerdict::Allowed {
                member_type: Some(MemberType::Single)
            }
        );
        assert_eq!(
            membership_verdict(2, Some(MemberType::Single), &p),
            MembershipVerdict::LimitExceeded {
                member_type: MemberType::Single,
                limit: 1
            }
        );
    }

    #[test]
    fn resolved_member_with_zero_claim_still_records_type() {
        assert_eq!(
            membership_verdict(0, Some(MemberType::Student), &policy()),
            MembershipVerdict::Allowed {
                member_type: Some(MemberType::Student)
            }
        );
    }
}
