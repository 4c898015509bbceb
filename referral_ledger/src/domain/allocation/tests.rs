use super::*;
use cool_asserts::assert_matches;

#[test]
fn it_accepts_every_split_of_the_pool() {
    for customer_discount in 0..=TOTAL_DISCOUNT_POOL {
        let allocation = Allocation::from_customer_discount(customer_discount).unwrap();
        assert_eq!(
            i32::from(allocation.customer_discount()) + i32::from(allocation.affiliate_reward()),
            TOTAL_DISCOUNT_POOL
        );
    }
}

#[test]
fn it_rejects_a_sum_other_than_the_pool() {
    assert_matches!(
        validate_allocation(10, 10),
        Err(AllocationError::PoolMismatch {
            customer_discount: 10,
            affiliate_reward: 10
        })
    );
    assert!(Allocation::new(5, 5).is_err());
}

#[test]
fn it_rejects_a_negative_reward_even_when_the_sum_matches() {
    assert_matches!(
        Allocation::from_customer_discount(20),
        Err(AllocationError::PoolMismatch {
            customer_discount: 20,
            affiliate_reward: -5
        })
    );
}

#[test]
fn it_defaults_to_ten_and_five() {
    let allocation = Allocation::default();
    assert_eq!(allocation.customer_discount(), 10);
    assert_eq!(allocation.affiliate_reward(), 5);
}

#[test]
fn it_applies_percentages_to_the_eligible_amount() {
    let allocation = Allocation::new(10, 5).unwrap();
    let eligible = Money::from_cents(12_345);

    assert_eq!(
        allocation.customer_discount_amount(eligible),
        Some(Money::from_cents(1_235))
    );
    assert_eq!(
        allocation.affiliate_reward_amount(eligible),
        Some(Money::from_cents(617))
    );
}

#[test]
fn it_validates_on_deserialize() {
    let ok: Allocation =
        serde_json::from_str(r#"{"customerDiscount": 15, "affiliateReward": 0}"#).unwrap();
    assert_eq!(ok.affiliate_reward(), 0);

    let err = serde_json::from_str::<Allocation>(r#"{"customerDiscount": 15, "affiliateReward": 5}"#);
    assert!(err.is_err());
}
