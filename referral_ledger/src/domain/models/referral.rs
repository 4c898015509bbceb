use super::{AffiliateId, Money, OrderId, ReferralId, UserId};
use crate::domain::allocation::Allocation;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How long a referral can wait for its first qualifying order
pub const REFERRAL_TTL_DAYS: i64 = 30;

/// pending -> completed | expired | cancelled. The three outcomes are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReferralStatus {
    Pending,
    Completed,
    Expired,
    Cancelled,
}

impl ReferralStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ReferralStatus::Pending)
    }

    pub fn can_transition_to(self, next: ReferralStatus) -> bool {
        self == ReferralStatus::Pending && next.is_terminal()
    }
}

/// Attribution details kept for auditing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralMetadata {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub source: Option<String>,
}

/// Links one referred user to the affiliate who brought them in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Referral {
    pub id: ReferralId,
    pub affiliate_id: AffiliateId,
    pub referred_user_id: UserId,
    pub referral_date: DateTime<Utc>,
    /// copy of the affiliate's allocation at attribution time
    pub applied_allocation: Allocation,
    pub status: ReferralStatus,
    pub discount_applied: bool,
    pub reward_paid: bool,
    pub first_order_id: Option<OrderId>,
    /// the discount-eligible amount of the first order
    pub qualifying_amount: Option<Money>,
    pub cancellation_reason: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub metadata: ReferralMetadata,
}

impl Referral {
    /// a new pending referral, snapshotting the input allocation
    pub fn attribute(
        id: ReferralId,
        affiliate_id: AffiliateId,
        referred_user_id: UserId,
        allocation: Allocation,
        metadata: ReferralMetadata,
        now: DateTime<Utc>,
    ) -> Self {
        Referral {
            id,
            affiliate_id,
            referred_user_id,
            referral_date: now,
            applied_allocation: allocation,
            status: ReferralStatus::Pending,
            discount_applied: false,
            reward_paid: false,
            first_order_id: None,
            qualifying_amount: None,
            cancellation_reason: None,
            expires_at: now + TimeDelta::days(REFERRAL_TTL_DAYS),
            metadata,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// pending and past its expiry
    pub fn is_due_for_expiry(&self, now: DateTime<Utc>) -> bool {
        self.status == ReferralStatus::Pending && self.is_expired_at(now)
    }

    /// completed referrals whose reward has not been credited yet
    pub fn awaits_reward(&self) -> bool {
        self.status == ReferralStatus::Completed && !self.reward_paid
    }

    /// the reward owed for the qualifying order, using the snapshotted allocation
    pub fn reward_amount(&self) -> Option<Money> {
        self.qualifying_amount
            .and_then(|amount| self.applied_allocation.affiliate_reward_amount(amount))
    }
}

/// A referral completion reported by the billing collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompleteReferralRequest {
    pub referral_id: ReferralId,
    pub order_id: OrderId,
    pub discount_eligible_amount: Money,
}

/// The referral after completion and the reward credited for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedReferral {
    pub referral: Referral,
    pub reward: Money,
    pub customer_discount: Money,
}

/// Counts from one maintenance pass over the referrals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct MaintenanceStats {
    /// pending referrals moved to expired
    pub expired: u64,
    /// unpaid rewards that were credited on retry
    pub rewards_settled: u64,
    /// unpaid rewards that failed again
    pub rewards_failed: u64,
}

impl std::ops::AddAssign for MaintenanceStats {
    fn add_assign(&mut self, rhs: Self) {
        self.expired += rhs.expired;
        self.rewards_settled += rhs.rewards_settled;
        self.rewards_failed += rhs.rewards_failed;
    }
}
