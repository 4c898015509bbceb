//! In process storage for the ledger.
//! Every port method runs under a single lock, which gives the same atomicity as the postgres transactions

use crate::domain::{
    allocation::Allocation,
    models::{
        Affiliate, AffiliateId, AffiliateStatus, CreditOutcome, EarningsCredit, Money,
        MonthlyEarnings, OrderId, PaymentDetails, Payout, PayoutId, PayoutMethod, PayoutSettlement,
        PayoutStatus, Referral, ReferralCode, ReferralId, ReferralStatus, UserId,
    },
    ports::{AffiliateRepo, PayoutRepo, ReferralRepo, Storage, StorageErr, UniqueKey},
};
use chrono::{DateTime, Datelike, Utc};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use tokio::sync::Mutex;


#[derive(Debug, Default)]
struct Tables {
    affiliates: HashMap<AffiliateId, Affiliate>,
    referrals: HashMap<ReferralId, Referral>,
    payouts: HashMap<PayoutId, Payout>,
    credits: HashMap<OrderId, EarningsCredit>,
    #[cfg(test)]
    failing_credits: u32,
    #[cfg(test)]
    interleaving: Option<Interleaving>,
}

/// A write another caller lands between a service's read and its conditional write
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
pub(crate) enum Interleaving {
    /// the referral is moved to this status first
    Transition(ReferralStatus),
    /// the conditional write does not apply and nothing visible changes
    Dropped,
}

impl Tables {
    fn touch(&mut self, id: AffiliateId, now: DateTime<Utc>) -> Option<&mut Affiliate> {
        let affiliate = self.affiliates.get_mut(&id)?;
        affiliate.version += 1;
        affiliate.updated_at = now;
        Some(affiliate)
    }

    /// run the pending interleaved write against the referral, returns whether this write is lost
    #[cfg(test)]
    fn interleave(&mut self, id: ReferralId) -> bool {
        match self.interleaving.take() {
            Some(Interleaving::Transition(status)) => {
                if let Some(referral) = self.referrals.get_mut(&id) {
                    referral.status = status;
                }
                false
            }
            Some(Interleaving::Dropped) => true,
            None => false,
        }
    }
}

/// Storage backed by in process hash maps
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// make the next `count` calls to [AffiliateRepo::credit_earnings] fail
    #[cfg(test)]
    pub(crate) async fn fail_next_credits(&self, count: u32) {
        self.tables.lock().await.failing_credits = count;
    }

    /// land `interleaving` right before the next conditional referral transition
    #[cfg(test)]
    pub(crate) async fn interleave_next_transition(&self, interleaving: Interleaving) {
        self.tables.lock().await.interleaving = Some(interleaving);
    }

    /// overwrite a stored referral, used to set up expiry scenarios
    #[cfg(test)]
    pub(crate) async fn put_referral(&self, referral: Referral) {
        self.tables
            .lock()
            .await
            .referrals
            .insert(referral.id, referral);
    }

    /// overwrite a stored affiliate, used to set up balance scenarios
    #[cfg(test)]
    pub(crate) async fn put_affiliate(&self, affiliate: Affiliate) {
        self.tables
            .lock()
            .await
            .affiliates
            .insert(affiliate.id, affiliate);
    }
}

impl Storage for InMemoryLedger {
    type Err = StorageErr;
}

impl AffiliateRepo for InMemoryLedger {
    async fn affiliate_by_id(&self, id: AffiliateId) -> Result<Option<Affiliate>, StorageErr> {
        Ok(self.tables.lock().await.affiliates.get(&id).cloned())
    }

    async fn affiliate_by_user(&self, user_id: UserId) -> Result<Option<Affiliate>, StorageErr> {
        Ok(self
            .tables
            .lock()
            .await
            .affiliates
            .values()
            .find(|a| a.user_id == user_id)
            .cloned())
    }

    async fn affiliate_by_code(
        &self,
        code: &ReferralCode,
    ) -> Result<Option<Affiliate>, StorageErr> {
        Ok(self
            .tables
            .lock()
            .await
            .affiliates
            .values()
            .find(|a| &a.referral_code == code)
            .cloned())
    }

    async fn referral_code_exists(&self, code: &ReferralCode) -> Result<bool, StorageErr> {
        Ok(self
            .tables
            .lock()
            .await
            .affiliates
            .values()
            .any(|a| &a.referral_code == code))
    }

    async fn insert_affiliate(&self, affiliate: Affiliate) -> Result<Affiliate, StorageErr> {
        let mut tables = self.tables.lock().await;
        if tables.affiliates.contains_key(&affiliate.id) {
            return Err(StorageErr::Conflict(UniqueKey::RecordId));
        }
        for existing in tables.affiliates.values() {
            if existing.user_id == affiliate.user_id {
                return Err(StorageErr::Conflict(UniqueKey::AffiliateUser));
            }
            if existing.referral_code == affiliate.referral_code {
                return Err(StorageErr::Conflict(UniqueKey::ReferralCode));
            }
        }
        tables.affiliates.insert(affiliate.id, affiliate.clone());
        Ok(affiliate)
    }

    async fn update_allocation(
        &self,
        id: AffiliateId,
        allocation: Allocation,
        now: DateTime<Utc>,
    ) -> Result<Option<Affiliate>, StorageErr> {
        let mut tables = self.tables.lock().await;
        Ok(tables.touch(id, now).map(|a| {
            a.default_allocation = allocation;
            a.clone()
        }))
    }

    async fn update_status(
        &self,
        id: AffiliateId,
        status: AffiliateStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Affiliate>, StorageErr> {
        let mut tables = self.tables.lock().await;
        Ok(tables.touch(id, now).map(|a| {
            a.status = status;
            a.clone()
        }))
    }

    async fn update_payout_method(
        &self,
        id: AffiliateId,
        method: PayoutMethod,
        now: DateTime<Utc>,
    ) -> Result<Option<Affiliate>, StorageErr> {
        let mut tables = self.tables.lock().await;
        Ok(tables.touch(id, now).map(|a| {
            a.payout_method = method;
            a.clone()
        }))
    }

    async fn increment_total_referrals(
        &self,
        id: AffiliateId,
        now: DateTime<Utc>,
    ) -> Result<Option<Affiliate>, StorageErr> {
        let mut tables = self.tables.lock().await;
        Ok(tables.touch(id, now).map(|a| {
            a.total_referrals += 1;
            a.clone()
        }))
    }

    async fn credit_earnings(
        &self,
        credit: EarningsCredit,
    ) -> Result<Option<CreditOutcome>, StorageErr> {
        let mut tables = self.tables.lock().await;

        #[cfg(test)]
        if tables.failing_credits > 0 {
            tables.failing_credits -= 1;
            return Err(StorageErr::Backend(anyhow::anyhow!("injected credit failure")));
        }

        if tables.credits.contains_key(&credit.order_id) {
            return Ok(tables
                .affiliates
                .get(&credit.affiliate_id)
                .cloned()
                .map(CreditOutcome::AlreadyCredited));
        }

        let Some(current) = tables.affiliates.get(&credit.affiliate_id) else {
            return Ok(None);
        };
        let (Some(available), Some(total)) = (
            current.available_balance.checked_add(credit.amount),
            current.total_earnings.checked_add(credit.amount),
        ) else {
            return Err(balance_overflow(credit.affiliate_id));
        };

        let Some(affiliate) = tables.touch(credit.affiliate_id, credit.credited_at) else {
            return Ok(None);
        };
        affiliate.available_balance = available;
        affiliate.total_earnings = total;
        affiliate.successful_referrals += 1;
        let affiliate = affiliate.clone();

        tables.credits.insert(credit.order_id, credit);
        Ok(Some(CreditOutcome::Credited(affiliate)))
    }

    async fn earnings_since(
        &self,
        id: AffiliateId,
        since: DateTime<Utc>,
    ) -> Result<Money, StorageErr> {
        Ok(self
            .tables
            .lock()
            .await
            .credits
            .values()
            .filter(|c| c.affiliate_id == id && c.credited_at >= since)
            .map(|c| c.amount)
            .sum())
    }

    async fn monthly_earnings(&self, id: AffiliateId) -> Result<Vec<MonthlyEarnings>, StorageErr> {
        let tables = self.tables.lock().await;
        let mut months: BTreeMap<(i32, u32), MonthlyEarnings> = BTreeMap::new();
        for credit in tables.credits.values().filter(|c| c.affiliate_id == id) {
            let (year, month) = (credit.credited_at.year(), credit.credited_at.month());
            let entry = months.entry((year, month)).or_insert(MonthlyEarnings {
                year,
                month,
                total: Money::ZERO,
                orders: 0,
            });
            entry.total = entry
                .total
                .checked_add(credit.amount)
                .ok_or_else(|| balance_overflow(id))?;
            entry.orders += 1;
        }
        Ok(months.into_values().rev().collect())
    }
}

impl ReferralRepo for InMemoryLedger {
    async fn insert_referral(&self, referral: Referral) -> Result<Referral, StorageErr> {
        let mut tables = self.tables.lock().await;
        if tables.referrals.contains_key(&referral.id) {
            return Err(StorageErr::Conflict(UniqueKey::RecordId));
        }
        if tables
            .referrals
            .values()
            .any(|r| r.referred_user_id == referral.referred_user_id)
        {
            return Err(StorageErr::Conflict(UniqueKey::ReferredUser));
        }
        let Some(affiliate) = tables.touch(referral.affiliate_id, referral.referral_date) else {
            return Err(StorageErr::Backend(anyhow::anyhow!(
                "referral references unknown affiliate {}",
                referral.affiliate_id
            )));
        };
        affiliate.total_referrals += 1;

        tables.referrals.insert(referral.id, referral.clone());
        Ok(referral)
    }

    async fn referral_by_id(&self, id: ReferralId) -> Result<Option<Referral>, StorageErr> {
        Ok(self.tables.lock().await.referrals.get(&id).cloned())
    }

    async fn referral_by_referred_user(
        &self,
        user_id: UserId,
    ) -> Result<Option<Referral>, StorageErr> {
        Ok(self
            .tables
            .lock()
            .await
            .referrals
            .values()
            .find(|r| r.referred_user_id == user_id)
            .cloned())
    }

    async fn referrals_for_affiliate(
        &self,
        id: AffiliateId,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<Referral>, StorageErr> {
        let tables = self.tables.lock().await;
        let mut referrals: Vec<_> = tables
            .referrals
            .values()
            .filter(|r| r.affiliate_id == id)
            .cloned()
            .collect();
        referrals.sort_by(|a, b| b.referral_date.cmp(&a.referral_date).then(b.id.cmp(&a.id)));
        Ok(referrals
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn count_referrals_for_affiliate(&self, id: AffiliateId) -> Result<u64, StorageErr> {
        Ok(self
            .tables
            .lock()
            .await
            .referrals
            .values()
            .filter(|r| r.affiliate_id == id)
            .count() as u64)
    }

    async fn complete_referral(
        &self,
        id: ReferralId,
        order_id: OrderId,
        qualifying_amount: Money,
        now: DateTime<Utc>,
    ) -> Result<Option<Referral>, StorageErr> {
        let mut tables = self.tables.lock().await;
        #[cfg(test)]
        if tables.interleave(id) {
            return Ok(None);
        }
        Ok(tables
            .referrals
            .get_mut(&id)
            .filter(|r| r.status == ReferralStatus::Pending && !r.is_expired_at(now))
            .map(|r| {
                r.status = ReferralStatus::Completed;
                r.first_order_id = Some(order_id);
                r.qualifying_amount = Some(qualifying_amount);
                r.discount_applied = true;
                r.clone()
            }))
    }

    async fn cancel_referral(
        &self,
        id: ReferralId,
        reason: String,
    ) -> Result<Option<Referral>, StorageErr> {
        let mut tables = self.tables.lock().await;
        #[cfg(test)]
        if tables.interleave(id) {
            return Ok(None);
        }
        Ok(tables
            .referrals
            .get_mut(&id)
            .filter(|r| r.status == ReferralStatus::Pending)
            .map(|r| {
                r.status = ReferralStatus::Cancelled;
                r.cancellation_reason = Some(reason);
                r.clone()
            }))
    }

    async fn expire_referral(
        &self,
        id: ReferralId,
        now: DateTime<Utc>,
    ) -> Result<Option<Referral>, StorageErr> {
        let mut tables = self.tables.lock().await;
        Ok(tables
            .referrals
            .get_mut(&id)
            .filter(|r| r.is_due_for_expiry(now))
            .map(|r| {
                r.status = ReferralStatus::Expired;
                r.clone()
            }))
    }

    async fn expire_due_referrals(&self, now: DateTime<Utc>) -> Result<u64, StorageErr> {
        let mut tables = self.tables.lock().await;
        let mut expired = 0;
        for referral in tables
            .referrals
            .values_mut()
            .filter(|r| r.is_due_for_expiry(now))
        {
            referral.status = ReferralStatus::Expired;
            expired += 1;
        }
        Ok(expired)
    }

    async fn mark_reward_paid(&self, id: ReferralId) -> Result<Option<Referral>, StorageErr> {
        let mut tables = self.tables.lock().await;
        Ok(tables
            .referrals
            .get_mut(&id)
            .filter(|r| r.awaits_reward())
            .map(|r| {
                r.reward_paid = true;
                r.clone()
            }))
    }

    async fn unpaid_completed_referrals(&self, limit: u32) -> Result<Vec<Referral>, StorageErr> {
        let tables = self.tables.lock().await;
        let mut unpaid: Vec<_> = tables
            .referrals
            .values()
            .filter(|r| r.awaits_reward())
            .cloned()
            .collect();
        unpaid.sort_by_key(|r| r.referral_date);
        unpaid.truncate(limit as usize);
        Ok(unpaid)
    }

    async fn average_order_value(&self, id: AffiliateId) -> Result<Option<Money>, StorageErr> {
        let tables = self.tables.lock().await;
        let (sum, count) = tables
            .referrals
            .values()
            .filter(|r| r.affiliate_id == id && r.status == ReferralStatus::Completed)
            .filter_map(|r| r.qualifying_amount)
            .fold((0i128, 0i128), |(sum, count), amount| {
                (sum + i128::from(amount.cents()), count + 1)
            });
        if count == 0 {
            return Ok(None);
        }
        let mean = (sum + count / 2) / count;
        Ok(i64::try_from(mean).ok().map(Money::from_cents))
    }
}

impl PayoutRepo for InMemoryLedger {
    async fn debit_for_payout(
        &self,
        expected_version: i64,
        payout: Payout,
    ) -> Result<Option<Affiliate>, StorageErr> {
        let mut tables = self.tables.lock().await;
        if tables.payouts.contains_key(&payout.id) {
            return Err(StorageErr::Conflict(UniqueKey::RecordId));
        }
        let Some(affiliate) = tables.affiliates.get(&payout.affiliate_id) else {
            return Ok(None);
        };
        if affiliate.version != expected_version || affiliate.available_balance != payout.amount {
            return Ok(None);
        }
        let Some(pending) = affiliate.pending_balance.checked_add(payout.amount) else {
            return Err(balance_overflow(payout.affiliate_id));
        };

        let Some(affiliate) = tables.touch(payout.affiliate_id, payout.created_at) else {
            return Ok(None);
        };
        affiliate.available_balance = Money::ZERO;
        affiliate.pending_balance = pending;
        let affiliate = affiliate.clone();

        tables.payouts.insert(payout.id, payout);
        Ok(Some(affiliate))
    }

    async fn payout_by_id(&self, id: PayoutId) -> Result<Option<Payout>, StorageErr> {
        Ok(self.tables.lock().await.payouts.get(&id).cloned())
    }

    async fn payouts_for_affiliate(&self, id: AffiliateId) -> Result<Vec<Payout>, StorageErr> {
        let tables = self.tables.lock().await;
        let mut payouts: Vec<_> = tables
            .payouts
            .values()
            .filter(|p| p.affiliate_id == id)
            .cloned()
            .collect();
        payouts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(payouts)
    }

    async fn mark_payout_processing(
        &self,
        id: PayoutId,
        details: PaymentDetails,
        now: DateTime<Utc>,
    ) -> Result<Option<Payout>, StorageErr> {
        let mut tables = self.tables.lock().await;
        Ok(tables
            .payouts
            .get_mut(&id)
            .filter(|p| p.status == PayoutStatus::Pending)
            .map(|p| {
                p.status = PayoutStatus::Processing;
                p.payment_details = std::mem::take(&mut p.payment_details).merge(details);
                p.updated_at = now;
                p.clone()
            }))
    }

    async fn settle_payout(
        &self,
        id: PayoutId,
        settlement: PayoutSettlement,
        now: DateTime<Utc>,
    ) -> Result<Option<Payout>, StorageErr> {
        let mut tables = self.tables.lock().await;
        let Some((affiliate_id, amount)) = tables
            .payouts
            .get(&id)
            .filter(|p| p.status.is_in_flight())
            .map(|p| (p.affiliate_id, p.amount))
        else {
            return Ok(None);
        };

        let refund = match settlement {
            PayoutSettlement::Completed(_) => Money::ZERO,
            PayoutSettlement::Failed { .. } => amount,
        };
        let balances = tables.affiliates.get(&affiliate_id).map(|a| {
            (
                a.pending_balance - amount,
                a.available_balance.checked_add(refund),
            )
        });
        let balances = match balances {
            Some((pending, Some(available))) => Some((pending, available)),
            Some((_, None)) => return Err(balance_overflow(affiliate_id)),
            None => None,
        };

        let Some(payout) = tables.payouts.get_mut(&id) else {
            return Ok(None);
        };
        payout.status = settlement.status();
        payout.processed_date = Some(now);
        payout.updated_at = now;
        match settlement {
            PayoutSettlement::Completed(details) => {
                payout.payment_details = std::mem::take(&mut payout.payment_details).merge(details);
            }
            PayoutSettlement::Failed { reason } => {
                payout.failure_reason = Some(reason);
            }
        }
        let payout = payout.clone();

        if let (Some((pending, available)), Some(affiliate)) =
            (balances, tables.touch(affiliate_id, now))
        {
            affiliate.pending_balance = pending;
            affiliate.available_balance = available;
        }
        Ok(Some(payout))
    }
}

fn balance_overflow(id: AffiliateId) -> StorageErr {
    StorageErr::Backend(anyhow::anyhow!("balance of affiliate {id} is out of range"))
}
