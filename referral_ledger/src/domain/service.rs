//! This module defines the services that are exposed by this crate

use crate::{
    domain::{
        allocation::Allocation,
        models::{
            Affiliate, AffiliateDashboard, AffiliateId, AffiliateStatus, CompleteReferralRequest,
            CompletedReferral, CreditOutcome, EarningsCredit, LedgerErr, MaintenanceStats, Money,
            MonthlyEarnings, OrderId, Page, PageRequest, PaymentDetails, Payout, PayoutId,
            PayoutMethod, PayoutReceipt, PayoutSettlement, RecordKind, Referral, ReferralCode,
            ReferralId, ReferralMetadata, ReferralStatus, UserId,
        },
        ports::{
            AffiliateLedgerService, AffiliateRepo, IdGenerator, PayoutRepo, PayoutService,
            PayoutSettlementService, ReferralMaintenanceService, ReferralRepo, ReferralService,
            StorageErr, TimeGetter, UniqueKey,
        },
    },
    outbound::{ids::RandomIds, time::DefaultTime},
};
use chrono::{DateTime, TimeDelta, Utc};


/// how many fresh ids or codes we try before giving up on a write
const MAX_ID_ATTEMPTS: usize = 5;

/// how many unpaid rewards a single maintenance pass retries
const MAINTENANCE_BATCH: u32 = 100;

fn storage<E>(err: E) -> LedgerErr
where
    StorageErr: From<E>,
{
    LedgerErr::from(StorageErr::from(err))
}

/// concrete struct which implements every service port of the ledger
#[derive(Clone)]
pub struct LedgerServiceImpl<S, T = DefaultTime, I = RandomIds> {
    storage: S,
    time: T,
    ids: I,
}

impl<S, T, I> LedgerServiceImpl<S, T, I>
where
    S: AffiliateRepo + ReferralRepo + PayoutRepo,
    StorageErr: From<S::Err>,
    T: TimeGetter,
    I: IdGenerator,
{
    /// create a new instance of this service
    pub fn new(storage: S, time: T, ids: I) -> Self {
        LedgerServiceImpl { storage, time, ids }
    }

    async fn affiliate(&self, id: AffiliateId) -> Result<Affiliate, LedgerErr> {
        self.storage
            .affiliate_by_id(id)
            .await
            .map_err(storage)?
            .ok_or(LedgerErr::NotFound(RecordKind::Affiliate))
    }

    async fn user_affiliate(&self, user_id: UserId) -> Result<Affiliate, LedgerErr> {
        self.storage
            .affiliate_by_user(user_id)
            .await
            .map_err(storage)?
            .ok_or(LedgerErr::NotFound(RecordKind::Affiliate))
    }

    async fn referral(&self, id: ReferralId) -> Result<Referral, LedgerErr> {
        self.storage
            .referral_by_id(id)
            .await
            .map_err(storage)?
            .ok_or(LedgerErr::NotFound(RecordKind::Referral))
    }

    async fn payout(&self, id: PayoutId) -> Result<Payout, LedgerErr> {
        self.storage
            .payout_by_id(id)
            .await
            .map_err(storage)?
            .ok_or(LedgerErr::NotFound(RecordKind::Payout))
    }

    async fn unused_referral_code(&self) -> Result<ReferralCode, LedgerErr> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let code = self.ids.referral_code();
            if !self
                .storage
                .referral_code_exists(&code)
                .await
                .map_err(storage)?
            {
                return Ok(code);
            }
            tracing::debug!(%code, "referral code collision");
        }
        Err(LedgerErr::Storage(anyhow::anyhow!(
            "no unused referral code after {MAX_ID_ATTEMPTS} attempts"
        )))
    }

    /// explain why a conditional referral transition did not apply
    async fn lost_referral_transition(&self, id: ReferralId, now: DateTime<Utc>) -> LedgerErr {
        match self.referral(id).await {
            Err(e) => e,
            Ok(r) if r.status == ReferralStatus::Expired || r.is_due_for_expiry(now) => {
                LedgerErr::Expired {
                    expires_at: r.expires_at,
                }
            }
            Ok(r) if r.status != ReferralStatus::Pending => {
                LedgerErr::AlreadyProcessed(RecordKind::Referral)
            }
            Ok(_) => LedgerErr::ConcurrencyConflict,
        }
    }

    /// explain why a conditional payout transition did not apply
    async fn lost_payout_transition(&self, id: PayoutId) -> LedgerErr {
        match self.payout(id).await {
            Err(e) => e,
            Ok(_) => LedgerErr::AlreadyProcessed(RecordKind::Payout),
        }
    }

    async fn credit(&self, credit: EarningsCredit) -> Result<CreditOutcome, LedgerErr> {
        if credit.amount < Money::ZERO {
            return Err(LedgerErr::InvalidAmount(credit.amount));
        }
        let affiliate_id = credit.affiliate_id;
        let order_id = credit.order_id;
        let outcome = self
            .storage
            .credit_earnings(credit)
            .await
            .map_err(storage)?
            .ok_or(LedgerErr::NotFound(RecordKind::Affiliate))?;

        match &outcome {
            CreditOutcome::Credited(a) => tracing::info!(
                %affiliate_id,
                %order_id,
                available_balance = %a.available_balance,
                "credited earnings"
            ),
            CreditOutcome::AlreadyCredited(_) => {
                tracing::info!(%affiliate_id, %order_id, "order was already credited")
            }
        }
        Ok(outcome)
    }

    /// credit the reward of a completed referral, then flag it as paid.
    /// Any failure leaves `reward_paid == false` so the work can be retried
    async fn settle_reward(&self, referral: Referral) -> Result<Referral, LedgerErr> {
        let referral_id = referral.id;
        let failed = |source: LedgerErr| LedgerErr::RewardCreditFailed {
            referral_id,
            source: Box::new(source),
        };

        let (Some(order_id), Some(reward)) = (referral.first_order_id, referral.reward_amount())
        else {
            return Err(failed(LedgerErr::Storage(anyhow::anyhow!(
                "completed referral has no qualifying order"
            ))));
        };

        self.credit(EarningsCredit {
            order_id,
            affiliate_id: referral.affiliate_id,
            referral_id: Some(referral_id),
            amount: reward,
            credited_at: self.time.now(),
        })
        .await
        .map_err(failed)?;

        match self
            .storage
            .mark_reward_paid(referral_id)
            .await
            .map_err(|e| failed(storage(e)))?
        {
            Some(paid) => Ok(paid),
            // a concurrent retry got there first
            None => {
                let current = self.referral(referral_id).await.map_err(failed)?;
                if current.reward_paid {
                    Ok(current)
                } else {
                    Err(failed(LedgerErr::AlreadyProcessed(RecordKind::Referral)))
                }
            }
        }
    }

    async fn attribute(
        &self,
        affiliate: Affiliate,
        referred_user_id: UserId,
        metadata: ReferralMetadata,
    ) -> Result<Referral, LedgerErr> {
        if affiliate.status != AffiliateStatus::Active {
            return Err(LedgerErr::AffiliateInactive(affiliate.status));
        }
        if affiliate.user_id == referred_user_id {
            return Err(LedgerErr::SelfReferral);
        }
        if self
            .storage
            .referral_by_referred_user(referred_user_id)
            .await
            .map_err(storage)?
            .is_some()
        {
            return Err(LedgerErr::DuplicateReferral);
        }

        for _ in 0..MAX_ID_ATTEMPTS {
            let referral = Referral::attribute(
                ReferralId(self.ids.new_id()),
                affiliate.id,
                referred_user_id,
                affiliate.default_allocation,
                metadata.clone(),
                self.time.now(),
            );
            match self
                .storage
                .insert_referral(referral)
                .await
                .map_err(StorageErr::from)
            {
                Ok(referral) => {
                    tracing::info!(
                        referral_id = %referral.id,
                        affiliate_id = %affiliate.id,
                        "attributed referral"
                    );
                    return Ok(referral);
                }
                Err(StorageErr::Conflict(UniqueKey::RecordId)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(LedgerErr::Storage(anyhow::anyhow!(
            "no unused referral id after {MAX_ID_ATTEMPTS} attempts"
        )))
    }
}

impl<S> LedgerServiceImpl<S, DefaultTime, RandomIds>
where
    S: AffiliateRepo + ReferralRepo + PayoutRepo,
    StorageErr: From<S::Err>,
{
    /// create an instance of self with the default clock and id generator
    pub fn new_with_defaults(storage: S) -> Self {
        Self::new(storage, DefaultTime, RandomIds)
    }
}

impl<S, T, I> AffiliateLedgerService for LedgerServiceImpl<S, T, I>
where
    S: AffiliateRepo + ReferralRepo + PayoutRepo,
    StorageErr: From<S::Err>,
    T: TimeGetter,
    I: IdGenerator,
{
    #[tracing::instrument(err, skip(self))]
    async fn create_affiliate(
        &self,
        user_id: UserId,
        allocation: Allocation,
    ) -> Result<Affiliate, LedgerErr> {
        if self
            .storage
            .affiliate_by_user(user_id)
            .await
            .map_err(storage)?
            .is_some()
        {
            return Err(LedgerErr::DuplicateAffiliate);
        }

        for _ in 0..MAX_ID_ATTEMPTS {
            let code = self.unused_referral_code().await?;
            let affiliate = Affiliate::enroll(
                AffiliateId(self.ids.new_id()),
                user_id,
                code,
                allocation,
                self.time.now(),
            );
            match self
                .storage
                .insert_affiliate(affiliate)
                .await
                .map_err(StorageErr::from)
            {
                Ok(affiliate) => {
                    tracing::info!(
                        affiliate_id = %affiliate.id,
                        referral_code = %affiliate.referral_code,
                        "enrolled affiliate"
                    );
                    return Ok(affiliate);
                }
                Err(StorageErr::Conflict(key @ (UniqueKey::ReferralCode | UniqueKey::RecordId))) => {
                    tracing::warn!(%key, "generated value collided on insert, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(LedgerErr::Storage(anyhow::anyhow!(
            "could not enroll affiliate after {MAX_ID_ATTEMPTS} attempts"
        )))
    }

    async fn get_affiliate(&self, id: AffiliateId) -> Result<Affiliate, LedgerErr> {
        self.affiliate(id).await
    }

    async fn affiliate_for_user(&self, user_id: UserId) -> Result<Affiliate, LedgerErr> {
        self.user_affiliate(user_id).await
    }

    #[tracing::instrument(err, skip(self))]
    async fn update_allocation(
        &self,
        id: AffiliateId,
        customer_discount: i32,
    ) -> Result<Affiliate, LedgerErr> {
        let allocation = Allocation::from_customer_discount(customer_discount)?;
        self.storage
            .update_allocation(id, allocation, self.time.now())
            .await
            .map_err(storage)?
            .ok_or(LedgerErr::NotFound(RecordKind::Affiliate))
    }

    #[tracing::instrument(err, skip(self))]
    async fn set_status(
        &self,
        id: AffiliateId,
        status: AffiliateStatus,
    ) -> Result<Affiliate, LedgerErr> {
        self.storage
            .update_status(id, status, self.time.now())
            .await
            .map_err(storage)?
            .ok_or(LedgerErr::NotFound(RecordKind::Affiliate))
    }

    #[tracing::instrument(err, skip(self, method))]
    async fn set_payout_method(
        &self,
        id: AffiliateId,
        method: PayoutMethod,
    ) -> Result<Affiliate, LedgerErr> {
        self.storage
            .update_payout_method(id, method, self.time.now())
            .await
            .map_err(storage)?
            .ok_or(LedgerErr::NotFound(RecordKind::Affiliate))
    }

    #[tracing::instrument(err, skip(self))]
    async fn credit_earnings(
        &self,
        id: AffiliateId,
        order_id: OrderId,
        amount: Money,
    ) -> Result<CreditOutcome, LedgerErr> {
        self.credit(EarningsCredit {
            order_id,
            affiliate_id: id,
            referral_id: None,
            amount,
            credited_at: self.time.now(),
        })
        .await
    }

    #[tracing::instrument(err, skip(self))]
    async fn record_referral_attribution(&self, id: AffiliateId) -> Result<Affiliate, LedgerErr> {
        self.storage
            .increment_total_referrals(id, self.time.now())
            .await
            .map_err(storage)?
            .ok_or(LedgerErr::NotFound(RecordKind::Affiliate))
    }

    #[tracing::instrument(err, skip(self))]
    async fn dashboard(&self, user_id: UserId) -> Result<AffiliateDashboard, LedgerErr> {
        let affiliate = self.user_affiliate(user_id).await?;
        let since = self.time.now() - TimeDelta::days(AffiliateDashboard::RECENT_EARNINGS_DAYS);

        let (recent_referrals, recent_earnings, average_order_value) = tokio::join!(
            self.storage
                .referrals_for_affiliate(affiliate.id, AffiliateDashboard::RECENT_REFERRALS, 0),
            self.storage.earnings_since(affiliate.id, since),
            self.storage.average_order_value(affiliate.id)
        );

        Ok(AffiliateDashboard {
            conversion_rate: affiliate.conversion_rate(),
            recent_referrals: recent_referrals.map_err(storage)?,
            recent_earnings: recent_earnings.map_err(storage)?,
            average_order_value: average_order_value.map_err(storage)?.unwrap_or_default(),
            affiliate,
        })
    }

    #[tracing::instrument(err, skip(self))]
    async fn list_referrals(
        &self,
        user_id: UserId,
        page: PageRequest,
    ) -> Result<Page<Referral>, LedgerErr> {
        let affiliate = self.user_affiliate(user_id).await?;

        let (items, total) = tokio::join!(
            self.storage
                .referrals_for_affiliate(affiliate.id, page.per_page, page.offset()),
            self.storage.count_referrals_for_affiliate(affiliate.id)
        );

        Ok(Page::new(
            items.map_err(storage)?,
            page,
            total.map_err(storage)?,
        ))
    }

    #[tracing::instrument(err, skip(self))]
    async fn monthly_earnings(&self, user_id: UserId) -> Result<Vec<MonthlyEarnings>, LedgerErr> {
        let affiliate = self.user_affiliate(user_id).await?;
        self.storage
            .monthly_earnings(affiliate.id)
            .await
            .map_err(storage)
    }
}

impl<S, T, I> ReferralService for LedgerServiceImpl<S, T, I>
where
    S: AffiliateRepo + ReferralRepo + PayoutRepo,
    StorageErr: From<S::Err>,
    T: TimeGetter,
    I: IdGenerator,
{
    #[tracing::instrument(err, skip(self))]
    async fn create_referral(
        &self,
        affiliate_id: AffiliateId,
        referred_user_id: UserId,
        metadata: ReferralMetadata,
    ) -> Result<Referral, LedgerErr> {
        let affiliate = self.affiliate(affiliate_id).await?;
        self.attribute(affiliate, referred_user_id, metadata).await
    }

    #[tracing::instrument(err, skip(self))]
    async fn create_referral_by_code(
        &self,
        code: ReferralCode,
        referred_user_id: UserId,
        metadata: ReferralMetadata,
    ) -> Result<Referral, LedgerErr> {
        let affiliate = self
            .storage
            .affiliate_by_code(&code.normalized())
            .await
            .map_err(storage)?
            .ok_or(LedgerErr::NotFound(RecordKind::Affiliate))?;
        self.attribute(affiliate, referred_user_id, metadata).await
    }

    #[tracing::instrument(err, skip(self))]
    async fn complete_referral(
        &self,
        req: CompleteReferralRequest,
    ) -> Result<CompletedReferral, LedgerErr> {
        let CompleteReferralRequest {
            referral_id,
            order_id,
            discount_eligible_amount,
        } = req;
        if discount_eligible_amount < Money::ZERO {
            return Err(LedgerErr::InvalidAmount(discount_eligible_amount));
        }

        let now = self.time.now();
        let referral = self.referral(referral_id).await?;
        match referral.status {
            ReferralStatus::Pending if !referral.is_expired_at(now) => {}
            ReferralStatus::Pending | ReferralStatus::Expired => {
                return Err(LedgerErr::Expired {
                    expires_at: referral.expires_at,
                });
            }
            ReferralStatus::Completed | ReferralStatus::Cancelled => {
                return Err(LedgerErr::AlreadyProcessed(RecordKind::Referral));
            }
        }

        // the allocation is a snapshot, so the amounts are final before the transition
        let allocation = referral.applied_allocation;
        let (Some(reward), Some(customer_discount)) = (
            allocation.affiliate_reward_amount(discount_eligible_amount),
            allocation.customer_discount_amount(discount_eligible_amount),
        ) else {
            return Err(LedgerErr::InvalidAmount(discount_eligible_amount));
        };
        if !self.affiliate(referral.affiliate_id).await?.can_credit(reward) {
            return Err(LedgerErr::InvalidAmount(discount_eligible_amount));
        }

        let Some(completed) = self
            .storage
            .complete_referral(referral_id, order_id, discount_eligible_amount, now)
            .await
            .map_err(storage)?
        else {
            return Err(self.lost_referral_transition(referral_id, now).await);
        };

        let referral = self.settle_reward(completed).await?;

        Ok(CompletedReferral {
            referral,
            reward,
            customer_discount,
        })
    }

    #[tracing::instrument(err, skip(self))]
    async fn retry_reward(&self, id: ReferralId) -> Result<Referral, LedgerErr> {
        let referral = self.referral(id).await?;
        if referral.reward_paid {
            return Ok(referral);
        }
        if referral.status != ReferralStatus::Completed {
            return Err(LedgerErr::AlreadyProcessed(RecordKind::Referral));
        }
        self.settle_reward(referral).await
    }

    #[tracing::instrument(err, skip(self))]
    async fn expire_referral(&self, id: ReferralId) -> Result<Referral, LedgerErr> {
        let now = self.time.now();
        let referral = self.referral(id).await?;
        if !referral.is_due_for_expiry(now) {
            return Ok(referral);
        }

        match self
            .storage
            .expire_referral(id, now)
            .await
            .map_err(storage)?
        {
            Some(expired) => Ok(expired),
            None => {
                let current = self.referral(id).await?;
                match current.status {
                    ReferralStatus::Expired => Ok(current),
                    _ => Err(LedgerErr::AlreadyProcessed(RecordKind::Referral)),
                }
            }
        }
    }

    #[tracing::instrument(err, skip(self))]
    async fn cancel_referral(&self, id: ReferralId, reason: String) -> Result<Referral, LedgerErr> {
        let referral = self.referral(id).await?;
        if referral.status != ReferralStatus::Pending {
            return Err(LedgerErr::AlreadyProcessed(RecordKind::Referral));
        }

        match self
            .storage
            .cancel_referral(id, reason)
            .await
            .map_err(storage)?
        {
            Some(cancelled) => Ok(cancelled),
            None => Err(LedgerErr::AlreadyProcessed(RecordKind::Referral)),
        }
    }
}

impl<S, T, I> PayoutService for LedgerServiceImpl<S, T, I>
where
    S: AffiliateRepo + ReferralRepo + PayoutRepo,
    StorageErr: From<S::Err>,
    T: TimeGetter,
    I: IdGenerator,
{
    #[tracing::instrument(err, skip(self))]
    async fn request_payout(&self, affiliate_id: AffiliateId) -> Result<PayoutReceipt, LedgerErr> {
        let affiliate = self.affiliate(affiliate_id).await?;
        if affiliate.status == AffiliateStatus::Suspended {
            return Err(LedgerErr::AffiliateInactive(affiliate.status));
        }
        if !affiliate.can_request_payout() {
            return Err(LedgerErr::BelowMinimum {
                available: affiliate.available_balance,
                minimum: affiliate.minimum_payout,
            });
        }

        for _ in 0..MAX_ID_ATTEMPTS {
            let payout = Payout::request(
                PayoutId(self.ids.new_id()),
                affiliate.id,
                affiliate.available_balance,
                affiliate.payout_method.kind,
                self.time.now(),
            );
            match self
                .storage
                .debit_for_payout(affiliate.version, payout.clone())
                .await
                .map_err(StorageErr::from)
            {
                Ok(Some(updated)) => {
                    tracing::info!(
                        payout_id = %payout.id,
                        amount = %payout.amount,
                        "payout requested"
                    );
                    return Ok(PayoutReceipt {
                        new_balance: updated.available_balance,
                        payout,
                    });
                }
                Ok(None) => return Err(LedgerErr::ConcurrencyConflict),
                Err(StorageErr::Conflict(UniqueKey::RecordId)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(LedgerErr::Storage(anyhow::anyhow!(
            "no unused payout id after {MAX_ID_ATTEMPTS} attempts"
        )))
    }

    async fn list_payouts(&self, affiliate_id: AffiliateId) -> Result<Vec<Payout>, LedgerErr> {
        let affiliate = self.affiliate(affiliate_id).await?;
        self.storage
            .payouts_for_affiliate(affiliate.id)
            .await
            .map_err(storage)
    }
}

impl<S, T, I> PayoutSettlementService for LedgerServiceImpl<S, T, I>
where
    S: AffiliateRepo + ReferralRepo + PayoutRepo,
    StorageErr: From<S::Err>,
    T: TimeGetter,
    I: IdGenerator,
{
    #[tracing::instrument(err, skip(self))]
    async fn mark_processing(
        &self,
        id: PayoutId,
        details: PaymentDetails,
    ) -> Result<Payout, LedgerErr> {
        match self
            .storage
            .mark_payout_processing(id, details, self.time.now())
            .await
            .map_err(storage)?
        {
            Some(payout) => Ok(payout),
            None => Err(self.lost_payout_transition(id).await),
        }
    }

    #[tracing::instrument(err, skip(self))]
    async fn complete_payout(
        &self,
        id: PayoutId,
        details: PaymentDetails,
    ) -> Result<Payout, LedgerErr> {
        match self
            .storage
            .settle_payout(id, PayoutSettlement::Completed(details), self.time.now())
            .await
            .map_err(storage)?
        {
            Some(payout) => {
                tracing::info!(payout_id = %id, amount = %payout.amount, "payout completed");
                Ok(payout)
            }
            None => Err(self.lost_payout_transition(id).await),
        }
    }

    #[tracing::instrument(err, skip(self))]
    async fn fail_payout(&self, id: PayoutId, reason: String) -> Result<Payout, LedgerErr> {
        match self
            .storage
            .settle_payout(id, PayoutSettlement::Failed { reason }, self.time.now())
            .await
            .map_err(storage)?
        {
            Some(payout) => {
                tracing::warn!(
                    payout_id = %id,
                    amount = %payout.amount,
                    "payout failed, amount returned to available balance"
                );
                Ok(payout)
            }
            None => Err(self.lost_payout_transition(id).await),
        }
    }
}

impl<S, T, I> ReferralMaintenanceService for LedgerServiceImpl<S, T, I>
where
    S: AffiliateRepo + ReferralRepo + PayoutRepo,
    StorageErr: From<S::Err>,
    T: TimeGetter,
    I: IdGenerator,
{
    #[tracing::instrument(err, skip(self))]
    async fn sweep_expired(&self) -> Result<u64, LedgerErr> {
        let expired = self
            .storage
            .expire_due_referrals(self.time.now())
            .await
            .map_err(storage)?;
        if expired > 0 {
            tracing::info!(expired, "expired pending referrals");
        }
        Ok(expired)
    }

    #[tracing::instrument(err, skip(self))]
    async fn run_maintenance(&self) -> Result<MaintenanceStats, LedgerErr> {
        let mut stats = MaintenanceStats {
            expired: self.sweep_expired().await?,
            ..Default::default()
        };

        let unpaid = self
            .storage
            .unpaid_completed_referrals(MAINTENANCE_BATCH)
            .await
            .map_err(storage)?;

        for referral in unpaid {
            match self.settle_reward(referral).await {
                Ok(_) => stats.rewards_settled += 1,
                Err(e) => {
                    tracing::warn!(error = ?e, "reward retry failed");
                    stats.rewards_failed += 1;
                }
            }
        }

        if stats != MaintenanceStats::default() {
            tracing::info!(?stats, "referral maintenance pass");
        }
        Ok(stats)
    }
}
