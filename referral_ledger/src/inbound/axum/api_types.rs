use crate::domain::{
    allocation::Allocation,
    models::{
        Affiliate, AffiliateDashboard, AffiliateStatus, CompletedReferral, MonthlyEarnings, Page,
        PaymentDetails, PaymentMethod, Payout, PayoutMethod, PayoutReceipt, PayoutStatus,
        Referral, ReferralMetadata, ReferralStatus,
    },
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

/// The body of every error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Message to explain failure
    pub message: String,
}

/// The split of the 15% discount pool. Both values are percentages
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiAllocation {
    pub customer_discount: u8,
    pub affiliate_reward: u8,
}

impl From<Allocation> for ApiAllocation {
    fn from(value: Allocation) -> Self {
        ApiAllocation {
            customer_discount: value.customer_discount(),
            affiliate_reward: value.affiliate_reward(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiPayoutMethod {
    #[serde(rename = "type")]
    #[schema(value_type = String, example = "paypal")]
    pub kind: PaymentMethod,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

impl From<PayoutMethod> for ApiPayoutMethod {
    fn from(value: PayoutMethod) -> Self {
        ApiPayoutMethod {
            kind: value.kind,
            details: value.details,
        }
    }
}

impl From<ApiPayoutMethod> for PayoutMethod {
    fn from(value: ApiPayoutMethod) -> Self {
        PayoutMethod {
            kind: value.kind,
            details: value.details,
        }
    }
}

/// An affiliate record. Amounts are in cents
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiAffiliate {
    pub id: Uuid,
    pub user_id: Uuid,
    pub referral_code: String,
    pub default_allocation: ApiAllocation,
    pub total_earnings: i64,
    pub available_balance: i64,
    pub pending_balance: i64,
    pub total_referrals: u64,
    pub successful_referrals: u64,
    #[schema(value_type = String, example = "active")]
    pub status: AffiliateStatus,
    pub payout_method: ApiPayoutMethod,
    pub minimum_payout: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Affiliate> for ApiAffiliate {
    fn from(value: Affiliate) -> Self {
        let Affiliate {
            id,
            user_id,
            referral_code,
            default_allocation,
            total_earnings,
            available_balance,
            pending_balance,
            total_referrals,
            successful_referrals,
            status,
            payout_method,
            minimum_payout,
            version: _,
            created_at,
            updated_at,
        } = value;

        ApiAffiliate {
            id: id.0,
            user_id: user_id.0,
            referral_code: referral_code.0,
            default_allocation: default_allocation.into(),
            total_earnings: total_earnings.cents(),
            available_balance: available_balance.cents(),
            pending_balance: pending_balance.cents(),
            total_referrals,
            successful_referrals,
            status,
            payout_method: payout_method.into(),
            minimum_payout: minimum_payout.cents(),
            created_at,
            updated_at,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiReferralMetadata {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub source: Option<String>,
}

impl From<ReferralMetadata> for ApiReferralMetadata {
    fn from(value: ReferralMetadata) -> Self {
        ApiReferralMetadata {
            ip_address: value.ip_address,
            user_agent: value.user_agent,
            source: value.source,
        }
    }
}

impl From<ApiReferralMetadata> for ReferralMetadata {
    fn from(value: ApiReferralMetadata) -> Self {
        ReferralMetadata {
            ip_address: value.ip_address,
            user_agent: value.user_agent,
            source: value.source,
        }
    }
}

/// A referral record. Amounts are in cents
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiReferral {
    pub id: Uuid,
    pub affiliate_id: Uuid,
    pub referred_user_id: Uuid,
    pub referral_date: DateTime<Utc>,
    pub applied_allocation: ApiAllocation,
    #[schema(value_type = String, example = "pending")]
    pub status: ReferralStatus,
    pub discount_applied: bool,
    pub reward_paid: bool,
    pub first_order_id: Option<Uuid>,
    pub qualifying_amount: Option<i64>,
    pub cancellation_reason: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub metadata: ApiReferralMetadata,
}

impl From<Referral> for ApiReferral {
    fn from(value: Referral) -> Self {
        let Referral {
            id,
            affiliate_id,
            referred_user_id,
            referral_date,
            applied_allocation,
            status,
            discount_applied,
            reward_paid,
            first_order_id,
            qualifying_amount,
            cancellation_reason,
            expires_at,
            metadata,
        } = value;

        ApiReferral {
            id: id.0,
            affiliate_id: affiliate_id.0,
            referred_user_id: referred_user_id.0,
            referral_date,
            applied_allocation: applied_allocation.into(),
            status,
            discount_applied,
            reward_paid,
            first_order_id: first_order_id.map(|o| o.0),
            qualifying_amount: qualifying_amount.map(|m| m.cents()),
            cancellation_reason,
            expires_at,
            metadata: metadata.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiPaymentDetails {
    pub account_last4: Option<String>,
    pub payment_gateway: Option<String>,
    pub gateway_payout_id: Option<String>,
}

impl From<PaymentDetails> for ApiPaymentDetails {
    fn from(value: PaymentDetails) -> Self {
        ApiPaymentDetails {
            account_last4: value.account_last4,
            payment_gateway: value.payment_gateway,
            gateway_payout_id: value.gateway_payout_id,
        }
    }
}

impl From<ApiPaymentDetails> for PaymentDetails {
    fn from(value: ApiPaymentDetails) -> Self {
        PaymentDetails {
            account_last4: value.account_last4,
            payment_gateway: value.payment_gateway,
            gateway_payout_id: value.gateway_payout_id,
        }
    }
}

/// A payout record. Amounts are in cents
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiPayout {
    pub id: Uuid,
    pub affiliate_id: Uuid,
    pub amount: i64,
    #[schema(value_type = String, example = "paypal")]
    pub payment_method: PaymentMethod,
    #[schema(value_type = String, example = "pending")]
    pub status: PayoutStatus,
    pub processed_date: Option<DateTime<Utc>>,
    pub payment_details: ApiPaymentDetails,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Payout> for ApiPayout {
    fn from(value: Payout) -> Self {
        let Payout {
            id,
            affiliate_id,
            amount,
            payment_method,
            status,
            processed_date,
            payment_details,
            failure_reason,
            created_at,
            updated_at,
        } = value;

        ApiPayout {
            id: id.0,
            affiliate_id: affiliate_id.0,
            amount: amount.cents(),
            payment_method,
            status,
            processed_date,
            payment_details: payment_details.into(),
            failure_reason,
            created_at,
            updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiDashboard {
    pub affiliate: ApiAffiliate,
    /// the 10 most recent referrals
    pub recent_referrals: Vec<ApiReferral>,
    /// cents credited over the last 30 days
    pub recent_earnings: i64,
    /// percentage of referrals that converted
    pub conversion_rate: f64,
    /// mean qualifying amount of the completed referrals, in cents
    pub average_order_value: i64,
}

impl From<AffiliateDashboard> for ApiDashboard {
    fn from(value: AffiliateDashboard) -> Self {
        ApiDashboard {
            affiliate: value.affiliate.into(),
            recent_referrals: value
                .recent_referrals
                .into_iter()
                .map(ApiReferral::from)
                .collect(),
            recent_earnings: value.recent_earnings.cents(),
            conversion_rate: value.conversion_rate,
            average_order_value: value.average_order_value.cents(),
        }
    }
}

/// The earnings of one calendar month (UTC)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiMonthlyEarnings {
    pub year: i32,
    pub month: u32,
    /// cents credited in the month
    pub total_earnings: i64,
    pub order_count: u64,
}

impl From<MonthlyEarnings> for ApiMonthlyEarnings {
    fn from(value: MonthlyEarnings) -> Self {
        ApiMonthlyEarnings {
            year: value.year,
            month: value.month,
            total_earnings: value.total.cents(),
            order_count: value.orders,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiEarningsReport {
    /// lifetime earnings in cents
    pub total_earnings: i64,
    /// newest month first
    pub months: Vec<ApiMonthlyEarnings>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiReferralPage {
    pub items: Vec<ApiReferral>,
    pub current_page: u32,
    pub total_pages: u32,
    pub total: u64,
}

impl From<Page<Referral>> for ApiReferralPage {
    fn from(value: Page<Referral>) -> Self {
        ApiReferralPage {
            items: value.items.into_iter().map(ApiReferral::from).collect(),
            current_page: value.current_page,
            total_pages: value.total_pages,
            total: value.total,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiPayoutReceipt {
    /// the available balance after the request, always 0
    pub new_balance: i64,
    pub payout: ApiPayout,
}

impl From<PayoutReceipt> for ApiPayoutReceipt {
    fn from(value: PayoutReceipt) -> Self {
        ApiPayoutReceipt {
            new_balance: value.new_balance.cents(),
            payout: value.payout.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiCompletedReferral {
    pub referral: ApiReferral,
    /// cents credited to the affiliate
    pub reward: i64,
    /// cents taken off the customer's order
    pub customer_discount: i64,
}

impl From<CompletedReferral> for ApiCompletedReferral {
    fn from(value: CompletedReferral) -> Self {
        ApiCompletedReferral {
            referral: value.referral.into(),
            reward: value.reward.cents(),
            customer_discount: value.customer_discount.cents(),
        }
    }
}

/// Opt in to the affiliate program. Without a customer discount the 10/5 default split is used
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateAffiliateRequest {
    pub customer_discount: Option<i32>,
}

/// The affiliate reward becomes `15 - customerDiscount`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAllocationRequest {
    pub customer_discount: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateReferralRequest {
    /// the code the new user entered, matched case insensitively
    pub referral_code: String,
    pub referred_user_id: Uuid,
    #[serde(default)]
    pub metadata: ApiReferralMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompleteReferralBody {
    pub order_id: Uuid,
    /// the part of the order the allocation percentages apply to, in cents
    pub discount_eligible_amount: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReasonBody {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SetStatusRequest {
    #[schema(value_type = String, example = "suspended")]
    pub status: AffiliateStatus,
}

/// Parameters for listing referrals, 20 per page
#[derive(Debug, Clone, Default, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ReferralsQuery {
    /// 1 indexed page number, defaults to 1
    pub page: Option<u32>,
}
