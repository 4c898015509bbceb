use super::{AffiliateId, Money, PaymentMethod, PayoutId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// pending -> processing -> completed | failed. A pending payout may also settle directly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl PayoutStatus {
    /// payouts in these states still hold money in the affiliate's pending balance
    pub fn is_in_flight(self) -> bool {
        matches!(self, PayoutStatus::Pending | PayoutStatus::Processing)
    }
}

/// Opaque details reported by the payment gateway
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDetails {
    pub account_last4: Option<String>,
    pub payment_gateway: Option<String>,
    pub gateway_payout_id: Option<String>,
}

impl PaymentDetails {
    /// overlay the non empty fields of `other` on top of self
    pub fn merge(self, other: PaymentDetails) -> PaymentDetails {
        PaymentDetails {
            account_last4: other.account_last4.or(self.account_last4),
            payment_gateway: other.payment_gateway.or(self.payment_gateway),
            gateway_payout_id: other.gateway_payout_id.or(self.gateway_payout_id),
        }
    }
}

/// A withdrawal of an affiliate's available balance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payout {
    pub id: PayoutId,
    pub affiliate_id: AffiliateId,
    pub amount: Money,
    pub payment_method: PaymentMethod,
    pub status: PayoutStatus,
    pub processed_date: Option<DateTime<Utc>>,
    pub payment_details: PaymentDetails,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payout {
    pub fn request(
        id: PayoutId,
        affiliate_id: AffiliateId,
        amount: Money,
        payment_method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> Self {
        Payout {
            id,
            affiliate_id,
            amount,
            payment_method,
            status: PayoutStatus::Pending,
            processed_date: None,
            payment_details: PaymentDetails::default(),
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// The final outcome reported by the payment gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayoutSettlement {
    /// the money reached the affiliate
    Completed(PaymentDetails),
    /// the transfer failed, the amount goes back to the available balance
    Failed { reason: String },
}

impl PayoutSettlement {
    pub fn status(&self) -> PayoutStatus {
        match self {
            PayoutSettlement::Completed(_) => PayoutStatus::Completed,
            PayoutSettlement::Failed { .. } => PayoutStatus::Failed,
        }
    }
}

/// The affiliate's balance after a payout request and the payout that was created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutReceipt {
    pub new_balance: Money,
    pub payout: Payout,
}
