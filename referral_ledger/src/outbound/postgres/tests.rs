use super::*;
use cool_asserts::assert_matches;

fn affiliate(code: &str) -> Affiliate {
    Affiliate::enroll(
        AffiliateId(Uuid::now_v7()),
        UserId(Uuid::now_v7()),
        ReferralCode::with_suffix(code),
        Allocation::DEFAULT,
        Utc::now(),
    )
}

fn credit(affiliate: &Affiliate, order_id: OrderId, cents: i64) -> EarningsCredit {
    EarningsCredit {
        order_id,
        affiliate_id: affiliate.id,
        referral_id: None,
        amount: Money::from_cents(cents),
        credited_at: Utc::now(),
    }
}

#[sqlx::test(migrator = "LEDGER_MIGRATIONS")]
#[ignore = "requires DATABASE_URL"]
async fn test_insert_and_get_affiliate(pool: PgPool) -> anyhow::Result<()> {
    let storage = LedgerPgStorage::new(pool);
    let mut new = affiliate("A1B2C3D4");
    new.payout_method.kind = PaymentMethod::BankTransfer;
    new.payout_method
        .details
        .insert("iban".to_string(), "DE00".to_string());

    let inserted = storage.insert_affiliate(new.clone()).await?;
    assert_eq!(inserted.payout_method, new.payout_method);

    let by_user = storage.affiliate_by_user(new.user_id).await?.unwrap();
    assert_eq!(by_user.id, new.id);
    assert_eq!(by_user.default_allocation, Allocation::DEFAULT);
    assert_eq!(by_user.minimum_payout, Money::from_dollars(25));

    let by_code = storage.affiliate_by_code(&new.referral_code).await?.unwrap();
    assert_eq!(by_code.id, new.id);
    assert!(storage.referral_code_exists(&new.referral_code).await?);
    Ok(())
}

#[sqlx::test(migrator = "LEDGER_MIGRATIONS")]
#[ignore = "requires DATABASE_URL"]
async fn test_unique_violations_map_to_conflicts(pool: PgPool) -> anyhow::Result<()> {
    let storage = LedgerPgStorage::new(pool);
    let first = storage.insert_affiliate(affiliate("00000001")).await?;

    let mut same_user = affiliate("00000002");
    same_user.user_id = first.user_id;
    let err = storage.insert_affiliate(same_user).await.unwrap_err();
    assert_matches!(
        StorageErr::from(err),
        StorageErr::Conflict(UniqueKey::AffiliateUser)
    );

    let err = storage
        .insert_affiliate(affiliate("00000001"))
        .await
        .unwrap_err();
    assert_matches!(
        StorageErr::from(err),
        StorageErr::Conflict(UniqueKey::ReferralCode)
    );

    let referral = Referral::attribute(
        ReferralId(Uuid::now_v7()),
        first.id,
        UserId(Uuid::now_v7()),
        first.default_allocation,
        ReferralMetadata::default(),
        Utc::now(),
    );
    storage.insert_referral(referral.clone()).await?;
    let mut again = referral.clone();
    again.id = ReferralId(Uuid::now_v7());
    let err = storage.insert_referral(again).await.unwrap_err();
    assert_matches!(
        StorageErr::from(err),
        StorageErr::Conflict(UniqueKey::ReferredUser)
    );

    let after = storage.affiliate_by_id(first.id).await?.unwrap();
    assert_eq!(after.total_referrals, 1);
    Ok(())
}

#[sqlx::test(migrator = "LEDGER_MIGRATIONS")]
#[ignore = "requires DATABASE_URL"]
async fn test_credit_earnings_is_idempotent(pool: PgPool) -> anyhow::Result<()> {
    let storage = LedgerPgStorage::new(pool);
    let affiliate = storage.insert_affiliate(affiliate("CAFE0001")).await?;
    let order_id = OrderId(Uuid::now_v7());

    let first = storage
        .credit_earnings(credit(&affiliate, order_id, 1_000))
        .await?;
    assert_matches!(first, Some(CreditOutcome::Credited(a)) => {
        assert_eq!(a.available_balance, Money::from_cents(1_000));
        assert_eq!(a.total_earnings, Money::from_cents(1_000));
        assert_eq!(a.successful_referrals, 1);
    });

    let second = storage
        .credit_earnings(credit(&affiliate, order_id, 1_000))
        .await?;
    assert_matches!(second, Some(CreditOutcome::AlreadyCredited(a)) => {
        assert_eq!(a.available_balance, Money::from_cents(1_000));
    });

    let missing = Affiliate::enroll(
        AffiliateId(Uuid::now_v7()),
        UserId(Uuid::now_v7()),
        ReferralCode::with_suffix("DEAD0001"),
        Allocation::DEFAULT,
        Utc::now(),
    );
    let none = storage
        .credit_earnings(credit(&missing, OrderId(Uuid::now_v7()), 1_000))
        .await?;
    assert_eq!(none, None);

    let since = Utc::now() - chrono::TimeDelta::days(30);
    assert_eq!(
        storage.earnings_since(affiliate.id, since).await?,
        Money::from_cents(1_000)
    );
    Ok(())
}

#[sqlx::test(migrator = "LEDGER_MIGRATIONS")]
#[ignore = "requires DATABASE_URL"]
async fn test_referral_transitions_are_guarded(pool: PgPool) -> anyhow::Result<()> {
    let storage = LedgerPgStorage::new(pool);
    let affiliate = storage.insert_affiliate(affiliate("BEEF0001")).await?;
    let now = Utc::now();
    let referral = storage
        .insert_referral(Referral::attribute(
            ReferralId(Uuid::now_v7()),
            affiliate.id,
            UserId(Uuid::now_v7()),
            affiliate.default_allocation,
            ReferralMetadata {
                source: Some("newsletter".to_string()),
                ..Default::default()
            },
            now,
        ))
        .await?;
    assert_eq!(referral.metadata.source.as_deref(), Some("newsletter"));

    let order_id = OrderId(Uuid::now_v7());
    let completed = storage
        .complete_referral(referral.id, order_id, Money::from_dollars(100), now)
        .await?
        .unwrap();
    assert_eq!(completed.status, ReferralStatus::Completed);
    assert_eq!(completed.first_order_id, Some(order_id));
    assert!(completed.discount_applied);
    assert!(!completed.reward_paid);

    // second writer loses
    assert_eq!(
        storage
            .complete_referral(referral.id, order_id, Money::from_dollars(100), now)
            .await?,
        None
    );
    assert_eq!(
        storage
            .cancel_referral(referral.id, "fraud".to_string())
            .await?,
        None
    );

    let unpaid = storage.unpaid_completed_referrals(10).await?;
    assert_eq!(unpaid.len(), 1);

    let paid = storage.mark_reward_paid(referral.id).await?.unwrap();
    assert!(paid.reward_paid);
    assert_eq!(storage.mark_reward_paid(referral.id).await?, None);
    assert!(storage.unpaid_completed_referrals(10).await?.is_empty());
    Ok(())
}

#[sqlx::test(migrator = "LEDGER_MIGRATIONS")]
#[ignore = "requires DATABASE_URL"]
async fn test_expire_due_referrals(pool: PgPool) -> anyhow::Result<()> {
    let storage = LedgerPgStorage::new(pool);
    let affiliate = storage.insert_affiliate(affiliate("FACE0001")).await?;
    let long_ago = Utc::now() - chrono::TimeDelta::days(31);

    let stale = storage
        .insert_referral(Referral::attribute(
            ReferralId(Uuid::now_v7()),
            affiliate.id,
            UserId(Uuid::now_v7()),
            affiliate.default_allocation,
            ReferralMetadata::default(),
            long_ago,
        ))
        .await?;
    let fresh = storage
        .insert_referral(Referral::attribute(
            ReferralId(Uuid::now_v7()),
            affiliate.id,
            UserId(Uuid::now_v7()),
            affiliate.default_allocation,
            ReferralMetadata::default(),
            Utc::now(),
        ))
        .await?;

    let now = Utc::now();
    assert_eq!(
        storage
            .complete_referral(stale.id, OrderId(Uuid::now_v7()), Money::from_dollars(10), now)
            .await?,
        None
    );
    assert_eq!(storage.expire_referral(fresh.id, now).await?, None);
    assert_eq!(storage.expire_due_referrals(now).await?, 1);

    let stale = storage.referral_by_id(stale.id).await?.unwrap();
    assert_eq!(stale.status, ReferralStatus::Expired);

    let page = storage.referrals_for_affiliate(affiliate.id, 1, 0).await?;
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, fresh.id);
    assert_eq!(storage.count_referrals_for_affiliate(affiliate.id).await?, 2);
    Ok(())
}

#[sqlx::test(migrator = "LEDGER_MIGRATIONS")]
#[ignore = "requires DATABASE_URL"]
async fn test_payout_debit_and_settlement(pool: PgPool) -> anyhow::Result<()> {
    let storage = LedgerPgStorage::new(pool);
    let affiliate = storage.insert_affiliate(affiliate("ABCD0001")).await?;
    let credited = storage
        .credit_earnings(credit(&affiliate, OrderId(Uuid::now_v7()), 3_000))
        .await?
        .unwrap()
        .into_affiliate();

    let payout = Payout::request(
        PayoutId(Uuid::now_v7()),
        affiliate.id,
        credited.available_balance,
        credited.payout_method.kind,
        Utc::now(),
    );

    // stale version
    assert_eq!(
        storage
            .debit_for_payout(affiliate.version, payout.clone())
            .await?,
        None
    );
    assert_eq!(storage.payout_by_id(payout.id).await?, None);

    let debited = storage
        .debit_for_payout(credited.version, payout.clone())
        .await?
        .unwrap();
    assert_eq!(debited.available_balance, Money::ZERO);
    assert_eq!(debited.pending_balance, Money::from_cents(3_000));

    let processing = storage
        .mark_payout_processing(
            payout.id,
            PaymentDetails {
                payment_gateway: Some("stripe".to_string()),
                ..Default::default()
            },
            Utc::now(),
        )
        .await?
        .unwrap();
    assert_eq!(processing.status, PayoutStatus::Processing);

    let failed = storage
        .settle_payout(
            payout.id,
            PayoutSettlement::Failed {
                reason: "account closed".to_string(),
            },
            Utc::now(),
        )
        .await?
        .unwrap();
    assert_eq!(failed.status, PayoutStatus::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some("account closed"));
    assert_eq!(failed.payment_details.payment_gateway.as_deref(), Some("stripe"));

    let after = storage.affiliate_by_id(affiliate.id).await?.unwrap();
    assert_eq!(after.available_balance, Money::from_cents(3_000));
    assert_eq!(after.pending_balance, Money::ZERO);

    assert_eq!(
        storage
            .settle_payout(
                payout.id,
                PayoutSettlement::Completed(PaymentDetails::default()),
                Utc::now(),
            )
            .await?,
        None
    );
    assert_eq!(storage.payouts_for_affiliate(affiliate.id).await?.len(), 1);
    Ok(())
}

#[sqlx::test(migrator = "LEDGER_MIGRATIONS")]
#[ignore = "requires DATABASE_URL"]
async fn test_earnings_reports(pool: PgPool) -> anyhow::Result<()> {
    let storage = LedgerPgStorage::new(pool);
    let affiliate = storage.insert_affiliate(affiliate("ACDC0001")).await?;
    let march = DateTime::parse_from_rfc3339("2026-03-15T08:30:00Z")?.to_utc();
    let january = DateTime::parse_from_rfc3339("2026-01-31T23:59:59Z")?.to_utc();

    for (cents, credited_at) in [(300, january), (200, march), (500, march)] {
        let mut credit = credit(&affiliate, OrderId(Uuid::now_v7()), cents);
        credit.credited_at = credited_at;
        storage.credit_earnings(credit).await?;
    }
    let months = storage.monthly_earnings(affiliate.id).await?;
    assert_eq!(
        months,
        vec![
            MonthlyEarnings {
                year: 2026,
                month: 3,
                total: Money::from_cents(700),
                orders: 2,
            },
            MonthlyEarnings {
                year: 2026,
                month: 1,
                total: Money::from_cents(300),
                orders: 1,
            },
        ]
    );

    assert_eq!(storage.average_order_value(affiliate.id).await?, None);
    let now = Utc::now();
    for cents in [10_000, 5_001] {
        let referral = storage
            .insert_referral(Referral::attribute(
                ReferralId(Uuid::now_v7()),
                affiliate.id,
                UserId(Uuid::now_v7()),
                affiliate.default_allocation,
                ReferralMetadata::default(),
                now,
            ))
            .await?;
        storage
            .complete_referral(referral.id, OrderId(Uuid::now_v7()), Money::from_cents(cents), now)
            .await?;
    }
    assert_eq!(
        storage.average_order_value(affiliate.id).await?,
        Some(Money::from_cents(7_501))
    );
    Ok(())
}
