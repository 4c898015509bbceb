//! The allocation policy splits a fixed discount pool between the referred customer and the
//! referring affiliate.

use crate::domain::models::Money;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(test)]
mod tests;

/// The total percentage shared between customer discount and affiliate reward.
/// This is a business constant and is not configurable per affiliate.
pub const TOTAL_DISCOUNT_POOL: i32 = 15;

/// The errors that can occur when validating an allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocationError {
    /// the two percentages are out of range or do not sum to [TOTAL_DISCOUNT_POOL]
    #[error(
        "allocation of {customer_discount}% discount and {affiliate_reward}% reward does not split the {TOTAL_DISCOUNT_POOL}% pool"
    )]
    PoolMismatch {
        /// the requested customer discount percentage
        customer_discount: i32,
        /// the requested affiliate reward percentage
        affiliate_reward: i32,
    },
}

/// check that the input percentages form a valid split of the discount pool
pub fn validate_allocation(
    customer_discount: i32,
    affiliate_reward: i32,
) -> Result<(), AllocationError> {
    let pool = 0..=TOTAL_DISCOUNT_POOL;
    if pool.contains(&customer_discount)
        && pool.contains(&affiliate_reward)
        && customer_discount + affiliate_reward == TOTAL_DISCOUNT_POOL
    {
        Ok(())
    } else {
        Err(AllocationError::PoolMismatch {
            customer_discount,
            affiliate_reward,
        })
    }
}

/// A validated split of the discount pool.
/// Can only be constructed through [Allocation::new] or [Allocation::from_customer_discount],
/// so every value of this type satisfies the pool invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    customer_discount: u8,
    affiliate_reward: u8,
}

impl Allocation {
    /// the split applied to new affiliates
    pub const DEFAULT: Allocation = Allocation {
        customer_discount: 10,
        affiliate_reward: 5,
    };

    /// create a new allocation, validating the pool invariant
    pub fn new(customer_discount: i32, affiliate_reward: i32) -> Result<Self, AllocationError> {
        validate_allocation(customer_discount, affiliate_reward)?;
        Ok(Allocation {
            customer_discount: customer_discount as u8,
            affiliate_reward: affiliate_reward as u8,
        })
    }

    /// create an allocation where the affiliate reward is the complement of the customer discount
    pub fn from_customer_discount(customer_discount: i32) -> Result<Self, AllocationError> {
        Self::new(customer_discount, TOTAL_DISCOUNT_POOL - customer_discount)
    }

    pub fn customer_discount(&self) -> u8 {
        self.customer_discount
    }

    pub fn affiliate_reward(&self) -> u8 {
        self.affiliate_reward
    }

    /// the discount granted to the customer on the input discount-eligible amount
    pub fn customer_discount_amount(&self, eligible: Money) -> Option<Money> {
        eligible.percent(self.customer_discount)
    }

    /// the reward earned by the affiliate on the input discount-eligible amount
    pub fn affiliate_reward_amount(&self, eligible: Money) -> Option<Money> {
        eligible.percent(self.affiliate_reward)
    }
}

impl Default for Allocation {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAllocation {
    customer_discount: i32,
    affiliate_reward: i32,
}

impl<'de> Deserialize<'de> for Allocation {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let RawAllocation {
            customer_discount,
            affiliate_reward,
        } = RawAllocation::deserialize(deserializer)?;
        Allocation::new(customer_discount, affiliate_reward).map_err(serde::de::Error::custom)
    }
}
