//! This module provides the implementation for storing ledger data in postgres
use crate::domain::{
    allocation::{Allocation, AllocationError},
    models::{
        Affiliate, AffiliateId, AffiliateStatus, CreditOutcome, EarningsCredit, Money,
        MonthlyEarnings, OrderId, PaymentDetails, PaymentMethod, Payout, PayoutId, PayoutMethod,
        PayoutSettlement, PayoutStatus, Referral, ReferralCode, ReferralId, ReferralMetadata,
        ReferralStatus, UserId,
    },
    ports::{AffiliateRepo, PayoutRepo, ReferralRepo, Storage, StorageErr, UniqueKey},
};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, prelude::FromRow, types::Json};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

#[cfg(test)]
mod tests;

/// The schema migrations for the ledger tables
pub static LEDGER_MIGRATIONS: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Concrete implementation of storage ports against a postgres instance
#[derive(Debug, Clone)]
pub struct LedgerPgStorage {
    pool: PgPool,
}

impl LedgerPgStorage {
    /// create a new instance of Self
    pub fn new(pool: PgPool) -> Self {
        LedgerPgStorage { pool }
    }
}

/// the types of errors that can occur on [LedgerPgStorage]
#[derive(Debug, Error)]
pub enum LedgerPgErr {
    /// there was a sqlx error
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    /// the database contained an unknown enum value
    #[error("unexpected value {value:?} in column {column}")]
    UnknownValue {
        /// the column holding the value
        column: &'static str,
        /// the stored value
        value: String,
    },
    /// the database contained an allocation that breaks the pool invariant
    #[error(transparent)]
    Allocation(#[from] AllocationError),
}

impl From<LedgerPgErr> for StorageErr {
    fn from(value: LedgerPgErr) -> Self {
        let key = match &value {
            LedgerPgErr::Db(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                match db_err.constraint() {
                    Some("affiliates_user_id_key") => Some(UniqueKey::AffiliateUser),
                    Some("affiliates_referral_code_key") => Some(UniqueKey::ReferralCode),
                    Some("referrals_referred_user_id_key") => Some(UniqueKey::ReferredUser),
                    Some("affiliates_pkey" | "referrals_pkey" | "payouts_pkey") => {
                        Some(UniqueKey::RecordId)
                    }
                    _ => None,
                }
            }
            _ => None,
        };
        match key {
            Some(key) => StorageErr::Conflict(key),
            None => StorageErr::Backend(value.into()),
        }
    }
}

fn parse_column<T: std::str::FromStr>(
    column: &'static str,
    value: String,
) -> Result<T, LedgerPgErr> {
    value
        .parse()
        .map_err(|_| LedgerPgErr::UnknownValue { column, value })
}

#[derive(FromRow)]
struct AffiliateRow {
    id: Uuid,
    user_id: Uuid,
    referral_code: String,
    customer_discount: i16,
    affiliate_reward: i16,
    total_earnings: i64,
    available_balance: i64,
    pending_balance: i64,
    total_referrals: i64,
    successful_referrals: i64,
    status: String,
    payout_method: String,
    payout_details: Json<BTreeMap<String, String>>,
    minimum_payout: i64,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AffiliateRow {
    fn into_affiliate(self) -> Result<Affiliate, LedgerPgErr> {
        let AffiliateRow {
            id,
            user_id,
            referral_code,
            customer_discount,
            affiliate_reward,
            total_earnings,
            available_balance,
            pending_balance,
            total_referrals,
            successful_referrals,
            status,
            payout_method,
            payout_details,
            minimum_payout,
            version,
            created_at,
            updated_at,
        } = self;

        Ok(Affiliate {
            id: AffiliateId(id),
            user_id: UserId(user_id),
            referral_code: ReferralCode(referral_code),
            default_allocation: Allocation::new(
                i32::from(customer_discount),
                i32::from(affiliate_reward),
            )?,
            total_earnings: Money::from_cents(total_earnings),
            available_balance: Money::from_cents(available_balance),
            pending_balance: Money::from_cents(pending_balance),
            total_referrals: total_referrals as u64,
            successful_referrals: successful_referrals as u64,
            status: parse_column("status", status)?,
            payout_method: PayoutMethod {
                kind: parse_column("payout_method", payout_method)?,
                details: payout_details.0,
            },
            minimum_payout: Money::from_cents(minimum_payout),
            version,
            created_at,
            updated_at,
        })
    }
}

#[derive(FromRow)]
struct ReferralRow {
    id: Uuid,
    affiliate_id: Uuid,
    referred_user_id: Uuid,
    referral_date: DateTime<Utc>,
    applied_customer_discount: i16,
    applied_affiliate_reward: i16,
    status: String,
    discount_applied: bool,
    reward_paid: bool,
    first_order_id: Option<Uuid>,
    qualifying_amount: Option<i64>,
    cancellation_reason: Option<String>,
    expires_at: DateTime<Utc>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    source: Option<String>,
}

impl ReferralRow {
    fn into_referral(self) -> Result<Referral, LedgerPgErr> {
        let ReferralRow {
            id,
            affiliate_id,
            referred_user_id,
            referral_date,
            applied_customer_discount,
            applied_affiliate_reward,
            status,
            discount_applied,
            reward_paid,
            first_order_id,
            qualifying_amount,
            cancellation_reason,
            expires_at,
            ip_address,
            user_agent,
            source,
        } = self;

        Ok(Referral {
            id: ReferralId(id),
            affiliate_id: AffiliateId(affiliate_id),
            referred_user_id: UserId(referred_user_id),
            referral_date,
            applied_allocation: Allocation::new(
                i32::from(applied_customer_discount),
                i32::from(applied_affiliate_reward),
            )?,
            status: parse_column::<ReferralStatus>("status", status)?,
            discount_applied,
            reward_paid,
            first_order_id: first_order_id.map(OrderId),
            qualifying_amount: qualifying_amount.map(Money::from_cents),
            cancellation_reason,
            expires_at,
            metadata: ReferralMetadata {
                ip_address,
                user_agent,
                source,
            },
        })
    }
}

#[derive(FromRow)]
struct PayoutRow {
    id: Uuid,
    affiliate_id: Uuid,
    amount: i64,
    payment_method: String,
    status: String,
    processed_date: Option<DateTime<Utc>>,
    account_last4: Option<String>,
    payment_gateway: Option<String>,
    gateway_payout_id: Option<String>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PayoutRow {
    fn into_payout(self) -> Result<Payout, LedgerPgErr> {
        let PayoutRow {
            id,
            affiliate_id,
            amount,
            payment_method,
            status,
            processed_date,
            account_last4,
            payment_gateway,
            gateway_payout_id,
            failure_reason,
            created_at,
            updated_at,
        } = self;

        Ok(Payout {
            id: PayoutId(id),
            affiliate_id: AffiliateId(affiliate_id),
            amount: Money::from_cents(amount),
            payment_method: parse_column::<PaymentMethod>("payment_method", payment_method)?,
            status: parse_column::<PayoutStatus>("status", status)?,
            processed_date,
            payment_details: PaymentDetails {
                account_last4,
                payment_gateway,
                gateway_payout_id,
            },
            failure_reason,
            created_at,
            updated_at,
        })
    }
}

#[derive(FromRow)]
struct MonthlyEarningsRow {
    year: i32,
    month: i32,
    total: i64,
    orders: i64,
}

impl From<MonthlyEarningsRow> for MonthlyEarnings {
    fn from(row: MonthlyEarningsRow) -> Self {
        MonthlyEarnings {
            year: row.year,
            month: row.month as u32,
            total: Money::from_cents(row.total),
            orders: row.orders as u64,
        }
    }
}

fn affiliate(row: Option<AffiliateRow>) -> Result<Option<Affiliate>, LedgerPgErr> {
    row.map(AffiliateRow::into_affiliate).transpose()
}

fn referral(row: Option<ReferralRow>) -> Result<Option<Referral>, LedgerPgErr> {
    row.map(ReferralRow::into_referral).transpose()
}

fn payout(row: Option<PayoutRow>) -> Result<Option<Payout>, LedgerPgErr> {
    row.map(PayoutRow::into_payout).transpose()
}

impl Storage for LedgerPgStorage {
    type Err = LedgerPgErr;
}

impl AffiliateRepo for LedgerPgStorage {
    #[tracing::instrument(err, skip(self))]
    async fn affiliate_by_id(&self, id: AffiliateId) -> Result<Option<Affiliate>, LedgerPgErr> {
        let row = sqlx::query_as::<_, AffiliateRow>(r#"SELECT * FROM affiliates WHERE id = $1"#)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        affiliate(row)
    }

    #[tracing::instrument(err, skip(self))]
    async fn affiliate_by_user(&self, user_id: UserId) -> Result<Option<Affiliate>, LedgerPgErr> {
        let row =
            sqlx::query_as::<_, AffiliateRow>(r#"SELECT * FROM affiliates WHERE user_id = $1"#)
                .bind(user_id.0)
                .fetch_optional(&self.pool)
                .await?;
        affiliate(row)
    }

    #[tracing::instrument(err, skip(self))]
    async fn affiliate_by_code(
        &self,
        code: &ReferralCode,
    ) -> Result<Option<Affiliate>, LedgerPgErr> {
        let row = sqlx::query_as::<_, AffiliateRow>(
            r#"SELECT * FROM affiliates WHERE referral_code = $1"#,
        )
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await?;
        affiliate(row)
    }

    async fn referral_code_exists(&self, code: &ReferralCode) -> Result<bool, LedgerPgErr> {
        let exists: bool = sqlx::query_scalar(
            r#"SELECT EXISTS (SELECT 1 FROM affiliates WHERE referral_code = $1)"#,
        )
        .bind(code.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    #[tracing::instrument(err, skip(self))]
    async fn insert_affiliate(&self, affiliate: Affiliate) -> Result<Affiliate, LedgerPgErr> {
        let row = sqlx::query_as::<_, AffiliateRow>(
            r#"
            INSERT INTO affiliates (
                id,
                user_id,
                referral_code,
                customer_discount,
                affiliate_reward,
                total_earnings,
                available_balance,
                pending_balance,
                total_referrals,
                successful_referrals,
                status,
                payout_method,
                payout_details,
                minimum_payout,
                version,
                created_at,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            RETURNING *
            "#,
        )
        .bind(affiliate.id.0)
        .bind(affiliate.user_id.0)
        .bind(affiliate.referral_code.as_str())
        .bind(i16::from(affiliate.default_allocation.customer_discount()))
        .bind(i16::from(affiliate.default_allocation.affiliate_reward()))
        .bind(affiliate.total_earnings.cents())
        .bind(affiliate.available_balance.cents())
        .bind(affiliate.pending_balance.cents())
        .bind(affiliate.total_referrals as i64)
        .bind(affiliate.successful_referrals as i64)
        .bind(affiliate.status.to_string())
        .bind(affiliate.payout_method.kind.to_string())
        .bind(Json(&affiliate.payout_method.details))
        .bind(affiliate.minimum_payout.cents())
        .bind(affiliate.version)
        .bind(affiliate.created_at)
        .bind(affiliate.updated_at)
        .fetch_one(&self.pool)
        .await?;
        row.into_affiliate()
    }

    #[tracing::instrument(err, skip(self))]
    async fn update_allocation(
        &self,
        id: AffiliateId,
        allocation: Allocation,
        now: DateTime<Utc>,
    ) -> Result<Option<Affiliate>, LedgerPgErr> {
        let row = sqlx::query_as::<_, AffiliateRow>(
            r#"
            UPDATE affiliates
            SET customer_discount = $2,
                affiliate_reward = $3,
                version = version + 1,
                updated_at = $4
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id.0)
        .bind(i16::from(allocation.customer_discount()))
        .bind(i16::from(allocation.affiliate_reward()))
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        affiliate(row)
    }

    #[tracing::instrument(err, skip(self))]
    async fn update_status(
        &self,
        id: AffiliateId,
        status: AffiliateStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Affiliate>, LedgerPgErr> {
        let row = sqlx::query_as::<_, AffiliateRow>(
            r#"
            UPDATE affiliates
            SET status = $2, version = version + 1, updated_at = $3
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id.0)
        .bind(status.to_string())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        affiliate(row)
    }

    #[tracing::instrument(err, skip(self, method))]
    async fn update_payout_method(
        &self,
        id: AffiliateId,
        method: PayoutMethod,
        now: DateTime<Utc>,
    ) -> Result<Option<Affiliate>, LedgerPgErr> {
        let row = sqlx::query_as::<_, AffiliateRow>(
            r#"
            UPDATE affiliates
            SET payout_method = $2,
                payout_details = $3,
                version = version + 1,
                updated_at = $4
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id.0)
        .bind(method.kind.to_string())
        .bind(Json(&method.details))
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        affiliate(row)
    }

    #[tracing::instrument(err, skip(self))]
    async fn increment_total_referrals(
        &self,
        id: AffiliateId,
        now: DateTime<Utc>,
    ) -> Result<Option<Affiliate>, LedgerPgErr> {
        let row = sqlx::query_as::<_, AffiliateRow>(
            r#"
            UPDATE affiliates
            SET total_referrals = total_referrals + 1,
                version = version + 1,
                updated_at = $2
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id.0)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        affiliate(row)
    }

    #[tracing::instrument(err, skip(self))]
    async fn credit_earnings(
        &self,
        credit: EarningsCredit,
    ) -> Result<Option<CreditOutcome>, LedgerPgErr> {
        let mut tx = self.pool.begin().await?;

        // the primary key on order_id makes a repeated credit a no-op
        let inserted = sqlx::query(
            r#"
            INSERT INTO affiliate_earnings (order_id, affiliate_id, referral_id, amount, credited_at)
            SELECT $1, $2, $3, $4, $5
            WHERE EXISTS (SELECT 1 FROM affiliates WHERE id = $2)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(credit.order_id.0)
        .bind(credit.affiliate_id.0)
        .bind(credit.referral_id.map(|id| id.0))
        .bind(credit.amount.cents())
        .bind(credit.credited_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            let row =
                sqlx::query_as::<_, AffiliateRow>(r#"SELECT * FROM affiliates WHERE id = $1"#)
                    .bind(credit.affiliate_id.0)
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.commit().await?;
            return Ok(affiliate(row)?.map(CreditOutcome::AlreadyCredited));
        }

        let row = sqlx::query_as::<_, AffiliateRow>(
            r#"
            UPDATE affiliates
            SET available_balance = available_balance + $2,
                total_earnings = total_earnings + $2,
                successful_referrals = successful_referrals + 1,
                version = version + 1,
                updated_at = $3
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(credit.affiliate_id.0)
        .bind(credit.amount.cents())
        .bind(credit.credited_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(CreditOutcome::Credited(row.into_affiliate()?)))
    }

    async fn earnings_since(
        &self,
        id: AffiliateId,
        since: DateTime<Utc>,
    ) -> Result<Money, LedgerPgErr> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(amount), 0)::BIGINT
            FROM affiliate_earnings
            WHERE affiliate_id = $1 AND credited_at >= $2
            "#,
        )
        .bind(id.0)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(Money::from_cents(total))
    }

    #[tracing::instrument(err, skip(self))]
    async fn monthly_earnings(&self, id: AffiliateId) -> Result<Vec<MonthlyEarnings>, LedgerPgErr> {
        let rows = sqlx::query_as::<_, MonthlyEarningsRow>(
            r#"
            SELECT
                EXTRACT(YEAR FROM credited_at AT TIME ZONE 'UTC')::INT AS year,
                EXTRACT(MONTH FROM credited_at AT TIME ZONE 'UTC')::INT AS month,
                SUM(amount)::BIGINT AS total,
                COUNT(*) AS orders
            FROM affiliate_earnings
            WHERE affiliate_id = $1
            GROUP BY 1, 2
            ORDER BY 1 DESC, 2 DESC
            "#,
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(MonthlyEarnings::from).collect())
    }
}

impl ReferralRepo for LedgerPgStorage {
    #[tracing::instrument(err, skip(self))]
    async fn insert_referral(&self, referral: Referral) -> Result<Referral, LedgerPgErr> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, ReferralRow>(
            r#"
            INSERT INTO referrals (
                id,
                affiliate_id,
                referred_user_id,
                referral_date,
                applied_customer_discount,
                applied_affiliate_reward,
                status,
                discount_applied,
                reward_paid,
                expires_at,
                ip_address,
                user_agent,
                source
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(referral.id.0)
        .bind(referral.affiliate_id.0)
        .bind(referral.referred_user_id.0)
        .bind(referral.referral_date)
        .bind(i16::from(referral.applied_allocation.customer_discount()))
        .bind(i16::from(referral.applied_allocation.affiliate_reward()))
        .bind(referral.status.to_string())
        .bind(referral.discount_applied)
        .bind(referral.reward_paid)
        .bind(referral.expires_at)
        .bind(referral.metadata.ip_address.as_deref())
        .bind(referral.metadata.user_agent.as_deref())
        .bind(referral.metadata.source.as_deref())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE affiliates
            SET total_referrals = total_referrals + 1,
                version = version + 1,
                updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(referral.affiliate_id.0)
        .bind(referral.referral_date)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        row.into_referral()
    }

    async fn referral_by_id(&self, id: ReferralId) -> Result<Option<Referral>, LedgerPgErr> {
        let row = sqlx::query_as::<_, ReferralRow>(r#"SELECT * FROM referrals WHERE id = $1"#)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        referral(row)
    }

    async fn referral_by_referred_user(
        &self,
        user_id: UserId,
    ) -> Result<Option<Referral>, LedgerPgErr> {
        let row = sqlx::query_as::<_, ReferralRow>(
            r#"SELECT * FROM referrals WHERE referred_user_id = $1"#,
        )
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;
        referral(row)
    }

    #[tracing::instrument(err, skip(self))]
    async fn referrals_for_affiliate(
        &self,
        id: AffiliateId,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<Referral>, LedgerPgErr> {
        let rows = sqlx::query_as::<_, ReferralRow>(
            r#"
            SELECT *
            FROM referrals
            WHERE affiliate_id = $1
            ORDER BY referral_date DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(id.0)
        .bind(i64::from(limit))
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ReferralRow::into_referral).collect()
    }

    async fn count_referrals_for_affiliate(&self, id: AffiliateId) -> Result<u64, LedgerPgErr> {
        let count: i64 =
            sqlx::query_scalar(r#"SELECT COUNT(*) FROM referrals WHERE affiliate_id = $1"#)
                .bind(id.0)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }

    #[tracing::instrument(err, skip(self))]
    async fn complete_referral(
        &self,
        id: ReferralId,
        order_id: OrderId,
        qualifying_amount: Money,
        now: DateTime<Utc>,
    ) -> Result<Option<Referral>, LedgerPgErr> {
        let row = sqlx::query_as::<_, ReferralRow>(
            r#"
            UPDATE referrals
            SET status = 'completed',
                first_order_id = $2,
                qualifying_amount = $3,
                discount_applied = TRUE
            WHERE id = $1 AND status = 'pending' AND expires_at > $4
            RETURNING *
            "#,
        )
        .bind(id.0)
        .bind(order_id.0)
        .bind(qualifying_amount.cents())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        referral(row)
    }

    #[tracing::instrument(err, skip(self))]
    async fn cancel_referral(
        &self,
        id: ReferralId,
        reason: String,
    ) -> Result<Option<Referral>, LedgerPgErr> {
        let row = sqlx::query_as::<_, ReferralRow>(
            r#"
            UPDATE referrals
            SET status = 'cancelled', cancellation_reason = $2
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id.0)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await?;
        referral(row)
    }

    #[tracing::instrument(err, skip(self))]
    async fn expire_referral(
        &self,
        id: ReferralId,
        now: DateTime<Utc>,
    ) -> Result<Option<Referral>, LedgerPgErr> {
        let row = sqlx::query_as::<_, ReferralRow>(
            r#"
            UPDATE referrals
            SET status = 'expired'
            WHERE id = $1 AND status = 'pending' AND expires_at <= $2
            RETURNING *
            "#,
        )
        .bind(id.0)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        referral(row)
    }

    #[tracing::instrument(err, skip(self))]
    async fn expire_due_referrals(&self, now: DateTime<Utc>) -> Result<u64, LedgerPgErr> {
        let res = sqlx::query(
            r#"
            UPDATE referrals
            SET status = 'expired'
            WHERE status = 'pending' AND expires_at <= $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    #[tracing::instrument(err, skip(self))]
    async fn mark_reward_paid(&self, id: ReferralId) -> Result<Option<Referral>, LedgerPgErr> {
        let row = sqlx::query_as::<_, ReferralRow>(
            r#"
            UPDATE referrals
            SET reward_paid = TRUE
            WHERE id = $1 AND status = 'completed' AND NOT reward_paid
            RETURNING *
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        referral(row)
    }

    async fn unpaid_completed_referrals(&self, limit: u32) -> Result<Vec<Referral>, LedgerPgErr> {
        let rows = sqlx::query_as::<_, ReferralRow>(
            r#"
            SELECT *
            FROM referrals
            WHERE status = 'completed' AND NOT reward_paid
            ORDER BY referral_date
            LIMIT $1
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ReferralRow::into_referral).collect()
    }

    #[tracing::instrument(err, skip(self))]
    async fn average_order_value(&self, id: AffiliateId) -> Result<Option<Money>, LedgerPgErr> {
        let mean: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT ROUND(AVG(qualifying_amount))::BIGINT
            FROM referrals
            WHERE affiliate_id = $1 AND status = 'completed' AND qualifying_amount IS NOT NULL
            "#,
        )
        .bind(id.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(mean.map(Money::from_cents))
    }
}

impl PayoutRepo for LedgerPgStorage {
    #[tracing::instrument(err, skip(self))]
    async fn debit_for_payout(
        &self,
        expected_version: i64,
        payout: Payout,
    ) -> Result<Option<Affiliate>, LedgerPgErr> {
        let mut tx = self.pool.begin().await?;

        let Some(row) = sqlx::query_as::<_, AffiliateRow>(
            r#"
            UPDATE affiliates
            SET available_balance = 0,
                pending_balance = pending_balance + $3,
                version = version + 1,
                updated_at = $4
            WHERE id = $1 AND version = $2 AND available_balance = $3
            RETURNING *
            "#,
        )
        .bind(payout.affiliate_id.0)
        .bind(expected_version)
        .bind(payout.amount.cents())
        .bind(payout.created_at)
        .fetch_optional(&mut *tx)
        .await?
        else {
            tx.rollback().await?;
            return Ok(None);
        };

        // dropping the transaction on error rolls the debit back
        sqlx::query(
            r#"
            INSERT INTO payouts (
                id,
                affiliate_id,
                amount,
                payment_method,
                status,
                created_at,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(payout.id.0)
        .bind(payout.affiliate_id.0)
        .bind(payout.amount.cents())
        .bind(payout.payment_method.to_string())
        .bind(payout.status.to_string())
        .bind(payout.created_at)
        .bind(payout.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(row.into_affiliate()?))
    }

    async fn payout_by_id(&self, id: PayoutId) -> Result<Option<Payout>, LedgerPgErr> {
        let row = sqlx::query_as::<_, PayoutRow>(r#"SELECT * FROM payouts WHERE id = $1"#)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        payout(row)
    }

    async fn payouts_for_affiliate(&self, id: AffiliateId) -> Result<Vec<Payout>, LedgerPgErr> {
        let rows = sqlx::query_as::<_, PayoutRow>(
            r#"
            SELECT *
            FROM payouts
            WHERE affiliate_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PayoutRow::into_payout).collect()
    }

    #[tracing::instrument(err, skip(self))]
    async fn mark_payout_processing(
        &self,
        id: PayoutId,
        details: PaymentDetails,
        now: DateTime<Utc>,
    ) -> Result<Option<Payout>, LedgerPgErr> {
        let row = sqlx::query_as::<_, PayoutRow>(
            r#"
            UPDATE payouts
            SET status = 'processing',
                account_last4 = COALESCE($2, account_last4),
                payment_gateway = COALESCE($3, payment_gateway),
                gateway_payout_id = COALESCE($4, gateway_payout_id),
                updated_at = $5
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id.0)
        .bind(details.account_last4)
        .bind(details.payment_gateway)
        .bind(details.gateway_payout_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        payout(row)
    }

    #[tracing::instrument(err, skip(self))]
    async fn settle_payout(
        &self,
        id: PayoutId,
        settlement: PayoutSettlement,
        now: DateTime<Utc>,
    ) -> Result<Option<Payout>, LedgerPgErr> {
        let status = settlement.status();
        let (details, failure_reason) = match settlement {
            PayoutSettlement::Completed(details) => (details, None),
            PayoutSettlement::Failed { reason } => (PaymentDetails::default(), Some(reason)),
        };

        let mut tx = self.pool.begin().await?;

        let Some(row) = sqlx::query_as::<_, PayoutRow>(
            r#"
            UPDATE payouts
            SET status = $2,
                processed_date = $3,
                updated_at = $3,
                failure_reason = COALESCE($4, failure_reason),
                account_last4 = COALESCE($5, account_last4),
                payment_gateway = COALESCE($6, payment_gateway),
                gateway_payout_id = COALESCE($7, gateway_payout_id)
            WHERE id = $1 AND status IN ('pending', 'processing')
            RETURNING *
            "#,
        )
        .bind(id.0)
        .bind(status.to_string())
        .bind(now)
        .bind(failure_reason)
        .bind(details.account_last4)
        .bind(details.payment_gateway)
        .bind(details.gateway_payout_id)
        .fetch_optional(&mut *tx)
        .await?
        else {
            tx.rollback().await?;
            return Ok(None);
        };

        let refund = match status {
            PayoutStatus::Failed => row.amount,
            _ => 0,
        };

        sqlx::query(
            r#"
            UPDATE affiliates
            SET pending_balance = pending_balance - $2,
                available_balance = available_balance + $3,
                version = version + 1,
                updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(row.affiliate_id)
        .bind(row.amount)
        .bind(refund)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(row.into_payout()?))
    }
}
