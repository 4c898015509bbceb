//! The records, values and errors of the referral ledger domain

use crate::domain::{
    allocation::AllocationError,
    ports::{StorageErr, UniqueKey},
};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    ops::{Add, AddAssign, Sub},
};
use strum::Display;
use thiserror::Error;
use uuid::Uuid;

mod affiliate;
mod payout;
mod referral;

pub use affiliate::*;
pub use payout::*;
pub use referral::*;


macro_rules! id_type {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                $name(value)
            }
        }
    };
}

id_type!(
    /// identifies an [Affiliate]
    AffiliateId
);
id_type!(
    /// identifies a [Referral]
    ReferralId
);
id_type!(
    /// identifies a [Payout]
    PayoutId
);
id_type!(
    /// identifies a marketplace user, supplied by the identity collaborator
    UserId
);
id_type!(
    /// identifies an order, supplied by the billing collaborator
    OrderId
);

/// A non-negative amount of money in minor units (cents)
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    pub const fn from_dollars(dollars: i64) -> Self {
        Money(dollars * 100)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// apply a whole percentage, rounding half up to the cent.
    /// `None` when the result does not fit in the ledger's range
    pub fn percent(self, pct: u8) -> Option<Money> {
        let cents = (i128::from(self.0) * i128::from(pct) + 50) / 100;
        i64::try_from(cents).ok().map(Money)
    }

    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}${}.{:02}", abs / 100, abs % 100)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Self::Output {
        Money(self.0 - rhs.0)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Money::ZERO, Add::add)
    }
}

/// The kinds of records managed by the ledger, used for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum RecordKind {
    Affiliate,
    Referral,
    Payout,
}

/// The errors produced by the ledger services
#[derive(Debug, Error)]
pub enum LedgerErr {
    /// the requested discount split is invalid
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    /// the user already has an affiliate record
    #[error("user is already enrolled as an affiliate")]
    DuplicateAffiliate,
    /// the referred user already has a referral record
    #[error("user has already been referred")]
    DuplicateReferral,
    /// the record does not exist
    #[error("{0} not found")]
    NotFound(RecordKind),
    /// the record already left the state required for this operation
    #[error("{0} has already been processed")]
    AlreadyProcessed(RecordKind),
    /// the referral can no longer be completed
    #[error("referral expired at {expires_at}")]
    Expired {
        /// when the referral expired
        expires_at: chrono::DateTime<chrono::Utc>,
    },
    /// the available balance does not reach the affiliate's minimum payout
    #[error("available balance of {available} is below the minimum payout of {minimum}")]
    BelowMinimum {
        /// the current available balance
        available: Money,
        /// the configured minimum payout
        minimum: Money,
    },
    /// amounts reported by collaborators can never be negative
    #[error("amount {0} must not be negative")]
    InvalidAmount(Money),
    /// the affiliate balance changed between read and write, the caller should retry with fresh state
    #[error("affiliate balance was modified concurrently")]
    ConcurrencyConflict,
    /// the affiliate is not allowed to take part in this operation in its current status
    #[error("affiliate is {0}")]
    AffiliateInactive(AffiliateStatus),
    /// an affiliate cannot be attributed its own signup
    #[error("users cannot refer themselves")]
    SelfReferral,
    /// the referral was completed but the reward could not be credited.
    /// The referral stays unpaid and can be retried
    #[error("referral {referral_id} was completed but crediting the reward failed")]
    RewardCreditFailed {
        /// the completed referral awaiting its reward
        referral_id: ReferralId,
        /// the underlying failure
        #[source]
        source: Box<LedgerErr>,
    },
    /// the storage layer failed
    #[error(transparent)]
    Storage(anyhow::Error),
}

impl From<StorageErr> for LedgerErr {
    fn from(value: StorageErr) -> Self {
        match value {
            StorageErr::Conflict(UniqueKey::AffiliateUser) => LedgerErr::DuplicateAffiliate,
            StorageErr::Conflict(UniqueKey::ReferredUser) => LedgerErr::DuplicateReferral,
            StorageErr::Conflict(key) => {
                LedgerErr::Storage(anyhow::anyhow!("unresolved unique conflict on {key}"))
            }
            StorageErr::Backend(e) => LedgerErr::Storage(e),
        }
    }
}

/// A page request, pages are 1 indexed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    /// the number of referrals shown per page in the referral listing
    pub const REFERRALS_PER_PAGE: u32 = 20;

    pub fn new(page: Option<u32>, per_page: u32) -> Self {
        PageRequest {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.max(1),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.per_page)
    }
}

/// A single page of records along with the totals needed to render pagination
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub current_page: u32,
    pub total_pages: u32,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, request: PageRequest, total: u64) -> Self {
        Page {
            items,
            current_page: request.page,
            total_pages: u32::try_from(total.div_ceil(u64::from(request.per_page)))
                .unwrap_or(u32::MAX),
            total,
        }
    }
}
