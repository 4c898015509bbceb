use super::{AffiliateId, Money, OrderId, ReferralId, UserId};
use crate::domain::{allocation::Allocation, models::Referral};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};
use strum::{Display, EnumString};

/// The prefix shared by every generated referral code
pub const REFERRAL_CODE_PREFIX: &str = "WHITECOAT-";

/// The minimum payout for new affiliates
pub const DEFAULT_MINIMUM_PAYOUT: Money = Money::from_dollars(25);

/// The code a new user enters at signup to be attributed to an affiliate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReferralCode(pub String);

impl ReferralCode {
    /// build a code from the random suffix
    pub fn with_suffix(suffix: &str) -> Self {
        ReferralCode(format!("{REFERRAL_CODE_PREFIX}{}", suffix.to_uppercase()))
    }

    /// codes are matched case insensitively
    pub fn normalized(&self) -> ReferralCode {
        ReferralCode(self.0.trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReferralCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AffiliateStatus {
    #[default]
    Active,
    Paused,
    Suspended,
}

/// How money leaves the ledger
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    Paypal,
    BankTransfer,
    Crypto,
}

/// The affiliate's preferred payout destination
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutMethod {
    #[serde(rename = "type")]
    pub kind: PaymentMethod,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

/// The ledger state of a single enrolled affiliate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Affiliate {
    pub id: AffiliateId,
    pub user_id: UserId,
    pub referral_code: ReferralCode,
    pub default_allocation: Allocation,
    /// lifetime earnings, counted when an order is credited
    pub total_earnings: Money,
    /// earnings that can be requested as a payout
    pub available_balance: Money,
    /// payouts that have been requested but not yet settled by the gateway
    pub pending_balance: Money,
    pub total_referrals: u64,
    pub successful_referrals: u64,
    pub status: AffiliateStatus,
    pub payout_method: PayoutMethod,
    pub minimum_payout: Money,
    /// incremented on every balance change, used for optimistic concurrency
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Affiliate {
    /// a freshly enrolled affiliate with zero balances
    pub fn enroll(
        id: AffiliateId,
        user_id: UserId,
        referral_code: ReferralCode,
        allocation: Allocation,
        now: DateTime<Utc>,
    ) -> Self {
        Affiliate {
            id,
            user_id,
            referral_code,
            default_allocation: allocation,
            total_earnings: Money::ZERO,
            available_balance: Money::ZERO,
            pending_balance: Money::ZERO,
            total_referrals: 0,
            successful_referrals: 0,
            status: AffiliateStatus::Active,
            payout_method: PayoutMethod::default(),
            minimum_payout: DEFAULT_MINIMUM_PAYOUT,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// share of attributed referrals that converted, as a percentage
    pub fn conversion_rate(&self) -> f64 {
        if self.total_referrals == 0 {
            return 0.0;
        }
        self.successful_referrals as f64 / self.total_referrals as f64 * 100.0
    }

    /// whether crediting `amount` keeps the balances in range
    pub fn can_credit(&self, amount: Money) -> bool {
        self.total_earnings.checked_add(amount).is_some()
            && self.available_balance.checked_add(amount).is_some()
    }

    pub fn can_request_payout(&self) -> bool {
        self.available_balance >= self.minimum_payout && !self.available_balance.is_zero()
    }
}

/// One credited order. The order id is unique, which makes crediting idempotent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EarningsCredit {
    pub order_id: OrderId,
    pub affiliate_id: AffiliateId,
    pub referral_id: Option<ReferralId>,
    pub amount: Money,
    pub credited_at: DateTime<Utc>,
}

/// The result of crediting an order to an affiliate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreditOutcome {
    /// the balances were increased
    Credited(Affiliate),
    /// the order was credited before, nothing changed
    AlreadyCredited(Affiliate),
}

impl CreditOutcome {
    pub fn affiliate(&self) -> &Affiliate {
        match self {
            CreditOutcome::Credited(a) | CreditOutcome::AlreadyCredited(a) => a,
        }
    }

    pub fn into_affiliate(self) -> Affiliate {
        match self {
            CreditOutcome::Credited(a) | CreditOutcome::AlreadyCredited(a) => a,
        }
    }
}

/// The credits recorded in one calendar month (UTC)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthlyEarnings {
    pub year: i32,
    /// 1 to 12
    pub month: u32,
    pub total: Money,
    /// how many orders were credited
    pub orders: u64,
}

/// Everything the affiliate dashboard shows
#[derive(Debug, Clone)]
pub struct AffiliateDashboard {
    pub affiliate: Affiliate,
    pub recent_referrals: Vec<Referral>,
    /// earnings credited over [AffiliateDashboard::RECENT_EARNINGS_DAYS]
    pub recent_earnings: Money,
    pub conversion_rate: f64,
    /// mean qualifying amount of the completed referrals, zero without any
    pub average_order_value: Money,
}

impl AffiliateDashboard {
    pub const RECENT_REFERRALS: u32 = 10;
    pub const RECENT_EARNINGS_DAYS: i64 = 30;
}
