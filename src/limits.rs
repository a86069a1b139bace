//! Plan-tier usage-limit gate.
//!
//! Pure policy: given a plan and current counts, decide whether another
//! conversation/message/specialist invocation is allowed and report the
//! `{limit, used, remaining}` triples the account screen renders. The
//! sentinel `-1` means unlimited, uniformly across every check here.

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::models::enums::{LimitCategory, PlanTier};

/// Sentinel limit value meaning "no ceiling".
pub const UNLIMITED: i64 = -1;

/// Daily/monthly ceilings for one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryLimits {
    pub daily: i64,
    pub monthly: i64,
}

/// All ceilings for one plan tier.
#[derive(Debug, Clone, Copy)]
pub struct PlanLimits {
    /// Total conversations a user may keep (checked at creation).
    pub max_conversations_total: i64,
    /// Messages one conversation may hold (checked at append).
    pub max_messages_per_conversation: i64,
    pub conversations: CategoryLimits,
    pub messages: CategoryLimits,
    pub specialist: CategoryLimits,
}

impl PlanTier {
    pub fn limits(self) -> PlanLimits {
        match self {
            PlanTier::Free => PlanLimits {
                max_conversations_total: 25,
                max_messages_per_conversation: 100,
                conversations: CategoryLimits { daily: 10, monthly: 100 },
                messages: CategoryLimits { daily: 100, monthly: 1500 },
                specialist: CategoryLimits { daily: 5, monthly: 50 },
            },
            PlanTier::Pro => PlanLimits {
                max_conversations_total: 250,
                max_messages_per_conversation: 1000,
                conversations: CategoryLimits { daily: 100, monthly: 1000 },
                messages: CategoryLimits { daily: 1000, monthly: 15000 },
                specialist: CategoryLimits { daily: 50, monthly: 500 },
            },
            PlanTier::ProMax => PlanLimits {
                max_conversations_total: UNLIMITED,
                max_messages_per_conversation: UNLIMITED,
                conversations: CategoryLimits { daily: UNLIMITED, monthly: UNLIMITED },
                messages: CategoryLimits { daily: UNLIMITED, monthly: UNLIMITED },
                specialist: CategoryLimits { daily: UNLIMITED, monthly: UNLIMITED },
            },
        }
    }
}

/// Remaining quota for a `{limit, used}` pair. `-1` stays `-1`.
pub fn remaining(limit: i64, used: u32) -> i64 {
    if limit == UNLIMITED {
        UNLIMITED
    } else {
        (limit - used as i64).max(0)
    }
}

fn within(limit: i64, used: u32) -> bool {
    limit == UNLIMITED || (used as i64) < limit
}

fn check(
    plan: PlanTier,
    category: LimitCategory,
    limit: i64,
    used: u32,
) -> Result<(), SyncError> {
    if within(limit, used) {
        Ok(())
    } else {
        Err(SyncError::LimitExceeded { plan, category, limit })
    }
}

/// May this user start another conversation?
pub fn can_create_conversation(plan: PlanTier, current_total: u32) -> Result<(), SyncError> {
    check(
        plan,
        LimitCategory::Conversations,
        plan.limits().max_conversations_total,
        current_total,
    )
}

/// May another message be appended to a conversation of this size?
pub fn can_add_message(plan: PlanTier, message_count: u32) -> Result<(), SyncError> {
    check(
        plan,
        LimitCategory::Messages,
        plan.limits().max_messages_per_conversation,
        message_count,
    )
}

/// May this user invoke a specialist/developer persona again today?
pub fn can_invoke_specialist(plan: PlanTier, used_today: u32) -> Result<(), SyncError> {
    check(
        plan,
        LimitCategory::Specialist,
        plan.limits().specialist.daily,
        used_today,
    )
}

// ═══════════════════════════════════════════════════════════
// Usage summary — the read-only limit query interface
// ═══════════════════════════════════════════════════════════

/// One `{limit, used, remaining}` cell of the usage screen.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageTriple {
    pub limit: i64,
    pub used: u32,
    pub remaining: i64,
}

impl UsageTriple {
    fn new(limit: i64, used: u32) -> Self {
        Self {
            limit,
            used,
            remaining: remaining(limit, used),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.limit == UNLIMITED
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CategoryUsage {
    pub daily: UsageTriple,
    pub monthly: UsageTriple,
}

/// Daily/monthly usage counters, as tracked by the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageCounts {
    pub conversations_daily: u32,
    pub conversations_monthly: u32,
    pub messages_daily: u32,
    pub messages_monthly: u32,
    pub specialist_daily: u32,
    pub specialist_monthly: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub plan: PlanTier,
    pub conversations: CategoryUsage,
    pub messages: CategoryUsage,
    pub specialist: CategoryUsage,
}

pub fn usage_summary(plan: PlanTier, counts: &UsageCounts) -> UsageSummary {
    let limits = plan.limits();
    UsageSummary {
        plan,
        conversations: CategoryUsage {
            daily: UsageTriple::new(limits.conversations.daily, counts.conversations_daily),
            monthly: UsageTriple::new(limits.conversations.monthly, counts.conversations_monthly),
        },
        messages: CategoryUsage {
            daily: UsageTriple::new(limits.messages.daily, counts.messages_daily),
            monthly: UsageTriple::new(limits.messages.monthly, counts.messages_monthly),
        },
        specialist: CategoryUsage {
            daily: UsageTriple::new(limits.specialist.daily, counts.specialist_daily),
            monthly: UsageTriple::new(limits.specialist.monthly, counts.specialist_monthly),
        },
    }
}
