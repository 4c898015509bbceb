//! This module defines all of the ports that the referral ledger domain requires

use crate::domain::{
    allocation::Allocation,
    models::{
        Affiliate, AffiliateDashboard, AffiliateId, AffiliateStatus, CompleteReferralRequest,
        CompletedReferral, CreditOutcome, EarningsCredit, LedgerErr, MaintenanceStats, Money,
        MonthlyEarnings, OrderId, Page, PageRequest, PaymentDetails, Payout, PayoutId,
        PayoutMethod, PayoutReceipt, PayoutSettlement, Referral, ReferralCode, ReferralId,
        ReferralMetadata, UserId,
    },
};
use chrono::{DateTime, Utc};
use strum::Display;
use thiserror::Error;
use uuid::Uuid;

/// The unique constraints enforced by storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum UniqueKey {
    /// one affiliate per user
    AffiliateUser,
    /// referral codes are globally unique
    ReferralCode,
    /// one referral per referred user
    ReferredUser,
    /// a generated primary key collided
    RecordId,
}

/// The storage errors the domain knows how to interpret
#[derive(Debug, Error)]
pub enum StorageErr {
    /// a unique constraint rejected the write, nothing was persisted
    #[error("a record already exists for {0}")]
    Conflict(UniqueKey),
    /// any other storage failure
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Base trait for the storage ports, carries the shared error type
pub trait Storage: Send + Sync + 'static {
    /// the error type that can occur
    type Err: Send + std::fmt::Debug;
}

/// Storage of [Affiliate] records.
/// Every balance or counter change must be applied atomically by the implementation
pub trait AffiliateRepo: Storage {
    fn affiliate_by_id(
        &self,
        id: AffiliateId,
    ) -> impl Future<Output = Result<Option<Affiliate>, Self::Err>> + Send;

    fn affiliate_by_user(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = Result<Option<Affiliate>, Self::Err>> + Send;

    fn affiliate_by_code(
        &self,
        code: &ReferralCode,
    ) -> impl Future<Output = Result<Option<Affiliate>, Self::Err>> + Send;

    fn referral_code_exists(
        &self,
        code: &ReferralCode,
    ) -> impl Future<Output = Result<bool, Self::Err>> + Send;

    /// persist a new affiliate. Unique violations are reported as [StorageErr::Conflict]
    fn insert_affiliate(
        &self,
        affiliate: Affiliate,
    ) -> impl Future<Output = Result<Affiliate, Self::Err>> + Send;

    /// returns [None] when the affiliate does not exist
    fn update_allocation(
        &self,
        id: AffiliateId,
        allocation: Allocation,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<Affiliate>, Self::Err>> + Send;

    fn update_status(
        &self,
        id: AffiliateId,
        status: AffiliateStatus,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<Affiliate>, Self::Err>> + Send;

    fn update_payout_method(
        &self,
        id: AffiliateId,
        method: PayoutMethod,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<Affiliate>, Self::Err>> + Send;

    fn increment_total_referrals(
        &self,
        id: AffiliateId,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<Affiliate>, Self::Err>> + Send;

    /// record the credit and increase the balances in one atomic write.
    /// An order id that was credited before leaves every balance untouched.
    /// Returns [None] when the affiliate does not exist
    fn credit_earnings(
        &self,
        credit: EarningsCredit,
    ) -> impl Future<Output = Result<Option<CreditOutcome>, Self::Err>> + Send;

    /// sum of the credits recorded since the input time
    fn earnings_since(
        &self,
        id: AffiliateId,
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<Money, Self::Err>> + Send;

    /// credits grouped by the calendar month they were recorded in, newest month first
    fn monthly_earnings(
        &self,
        id: AffiliateId,
    ) -> impl Future<Output = Result<Vec<MonthlyEarnings>, Self::Err>> + Send;
}

/// Storage of [Referral] records.
/// Status transitions are conditional on the referral still being pending, the first writer wins
pub trait ReferralRepo: Storage {
    /// persist a new referral and increment the affiliate's total referrals in one atomic write
    fn insert_referral(
        &self,
        referral: Referral,
    ) -> impl Future<Output = Result<Referral, Self::Err>> + Send;

    fn referral_by_id(
        &self,
        id: ReferralId,
    ) -> impl Future<Output = Result<Option<Referral>, Self::Err>> + Send;

    fn referral_by_referred_user(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = Result<Option<Referral>, Self::Err>> + Send;

    /// newest first
    fn referrals_for_affiliate(
        &self,
        id: AffiliateId,
        limit: u32,
        offset: u64,
    ) -> impl Future<Output = Result<Vec<Referral>, Self::Err>> + Send;

    fn count_referrals_for_affiliate(
        &self,
        id: AffiliateId,
    ) -> impl Future<Output = Result<u64, Self::Err>> + Send;

    /// pending and unexpired -> completed. Returns [None] when the guard does not hold
    fn complete_referral(
        &self,
        id: ReferralId,
        order_id: OrderId,
        qualifying_amount: Money,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<Referral>, Self::Err>> + Send;

    /// pending -> cancelled. Returns [None] when the guard does not hold
    fn cancel_referral(
        &self,
        id: ReferralId,
        reason: String,
    ) -> impl Future<Output = Result<Option<Referral>, Self::Err>> + Send;

    /// pending and expired -> expired. Returns [None] when the guard does not hold
    fn expire_referral(
        &self,
        id: ReferralId,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<Referral>, Self::Err>> + Send;

    /// expire every due pending referral, returns how many moved
    fn expire_due_referrals(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, Self::Err>> + Send;

    /// completed and unpaid -> paid. Returns [None] when the guard does not hold
    fn mark_reward_paid(
        &self,
        id: ReferralId,
    ) -> impl Future<Output = Result<Option<Referral>, Self::Err>> + Send;

    /// completed referrals still waiting for their reward, oldest first
    fn unpaid_completed_referrals(
        &self,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<Referral>, Self::Err>> + Send;

    /// mean qualifying amount of the affiliate's completed referrals, rounded half up to the cent.
    /// [None] when none completed
    fn average_order_value(
        &self,
        id: AffiliateId,
    ) -> impl Future<Output = Result<Option<Money>, Self::Err>> + Send;
}

/// Storage of [Payout] records
pub trait PayoutRepo: Storage {
    /// In one atomic write, conditional on the affiliate still being at `expected_version` with the payout amount available:
    /// zero the available balance, add the amount to the pending balance and insert the payout.
    /// Returns [None] when the condition does not hold
    fn debit_for_payout(
        &self,
        expected_version: i64,
        payout: Payout,
    ) -> impl Future<Output = Result<Option<Affiliate>, Self::Err>> + Send;

    fn payout_by_id(
        &self,
        id: PayoutId,
    ) -> impl Future<Output = Result<Option<Payout>, Self::Err>> + Send;

    /// newest first
    fn payouts_for_affiliate(
        &self,
        id: AffiliateId,
    ) -> impl Future<Output = Result<Vec<Payout>, Self::Err>> + Send;

    /// pending -> processing. Returns [None] when the guard does not hold
    fn mark_payout_processing(
        &self,
        id: PayoutId,
        details: PaymentDetails,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<Payout>, Self::Err>> + Send;

    /// pending | processing -> completed | failed, releasing the pending balance and,
    /// on failure, crediting the amount back to the available balance in the same write.
    /// Returns [None] when the guard does not hold
    fn settle_payout(
        &self,
        id: PayoutId,
        settlement: PayoutSettlement,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<Payout>, Self::Err>> + Send;
}

/// port for getting the current system time.
/// Having a trait allows tests to be consistent
pub trait TimeGetter: Send + Sync + 'static {
    /// get the current system time
    fn now(&self) -> DateTime<Utc>;
}

/// port for generating identifiers and referral codes.
/// Generated values are collision checked against storage by the caller
#[cfg_attr(test, mockall::automock)]
pub trait IdGenerator: Send + Sync + 'static {
    /// a fresh record id
    fn new_id(&self) -> Uuid;
    /// a fresh referral code candidate
    fn referral_code(&self) -> ReferralCode;
}

/// The service managing affiliate enrollment and balances
pub trait AffiliateLedgerService: Send + Sync + 'static {
    fn create_affiliate(
        &self,
        user_id: UserId,
        allocation: Allocation,
    ) -> impl Future<Output = Result<Affiliate, LedgerErr>> + Send;

    fn get_affiliate(
        &self,
        id: AffiliateId,
    ) -> impl Future<Output = Result<Affiliate, LedgerErr>> + Send;

    fn affiliate_for_user(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = Result<Affiliate, LedgerErr>> + Send;

    /// the affiliate reward becomes the complement of the input customer discount
    fn update_allocation(
        &self,
        id: AffiliateId,
        customer_discount: i32,
    ) -> impl Future<Output = Result<Affiliate, LedgerErr>> + Send;

    fn set_status(
        &self,
        id: AffiliateId,
        status: AffiliateStatus,
    ) -> impl Future<Output = Result<Affiliate, LedgerErr>> + Send;

    fn set_payout_method(
        &self,
        id: AffiliateId,
        method: PayoutMethod,
    ) -> impl Future<Output = Result<Affiliate, LedgerErr>> + Send;

    /// credit the reward for a qualifying order, at most once per order id
    fn credit_earnings(
        &self,
        id: AffiliateId,
        order_id: OrderId,
        amount: Money,
    ) -> impl Future<Output = Result<CreditOutcome, LedgerErr>> + Send;

    fn record_referral_attribution(
        &self,
        id: AffiliateId,
    ) -> impl Future<Output = Result<Affiliate, LedgerErr>> + Send;

    fn dashboard(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = Result<AffiliateDashboard, LedgerErr>> + Send;

    fn list_referrals(
        &self,
        user_id: UserId,
        page: PageRequest,
    ) -> impl Future<Output = Result<Page<Referral>, LedgerErr>> + Send;

    /// the user's credited earnings per calendar month, newest first
    fn monthly_earnings(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = Result<Vec<MonthlyEarnings>, LedgerErr>> + Send;
}

/// The service managing the referral lifecycle
pub trait ReferralService: Send + Sync + 'static {
    fn create_referral(
        &self,
        affiliate_id: AffiliateId,
        referred_user_id: UserId,
        metadata: ReferralMetadata,
    ) -> impl Future<Output = Result<Referral, LedgerErr>> + Send;

    /// attribute a signup through the referral code the user entered
    fn create_referral_by_code(
        &self,
        code: ReferralCode,
        referred_user_id: UserId,
        metadata: ReferralMetadata,
    ) -> impl Future<Output = Result<Referral, LedgerErr>> + Send;

    fn complete_referral(
        &self,
        req: CompleteReferralRequest,
    ) -> impl Future<Output = Result<CompletedReferral, LedgerErr>> + Send;

    /// credit the reward of a completed referral whose earlier crediting failed
    fn retry_reward(
        &self,
        id: ReferralId,
    ) -> impl Future<Output = Result<Referral, LedgerErr>> + Send;

    fn expire_referral(
        &self,
        id: ReferralId,
    ) -> impl Future<Output = Result<Referral, LedgerErr>> + Send;

    fn cancel_referral(
        &self,
        id: ReferralId,
        reason: String,
    ) -> impl Future<Output = Result<Referral, LedgerErr>> + Send;
}

/// The service gating withdrawals
pub trait PayoutService: Send + Sync + 'static {
    fn request_payout(
        &self,
        affiliate_id: AffiliateId,
    ) -> impl Future<Output = Result<PayoutReceipt, LedgerErr>> + Send;

    fn list_payouts(
        &self,
        affiliate_id: AffiliateId,
    ) -> impl Future<Output = Result<Vec<Payout>, LedgerErr>> + Send;
}

/// The callbacks the payment gateway collaborator drives payouts through
pub trait PayoutSettlementService: Send + Sync + 'static {
    fn mark_processing(
        &self,
        id: PayoutId,
        details: PaymentDetails,
    ) -> impl Future<Output = Result<Payout, LedgerErr>> + Send;

    fn complete_payout(
        &self,
        id: PayoutId,
        details: PaymentDetails,
    ) -> impl Future<Output = Result<Payout, LedgerErr>> + Send;

    /// the failed amount is credited back to the affiliate's available balance
    fn fail_payout(
        &self,
        id: PayoutId,
        reason: String,
    ) -> impl Future<Output = Result<Payout, LedgerErr>> + Send;
}

/// Background upkeep of the referral records
pub trait ReferralMaintenanceService: Send + Sync + 'static {
    /// move every pending referral past its expiry to expired, returns how many moved
    fn sweep_expired(&self) -> impl Future<Output = Result<u64, LedgerErr>> + Send;

    /// expire due referrals and retry unpaid rewards
    fn run_maintenance(&self) -> impl Future<Output = Result<MaintenanceStats, LedgerErr>> + Send;
}

/// Every service the inbound adapters need
pub trait AffiliateProgram:
    AffiliateLedgerService + ReferralService + PayoutService + PayoutSettlementService
{
}

impl<T> AffiliateProgram for T where
    T: AffiliateLedgerService + ReferralService + PayoutService + PayoutSettlementService
{
}
