//! Random identifiers and referral codes

use crate::domain::{models::ReferralCode, ports::IdGenerator};
use rand::RngCore;
use uuid::Uuid;

/// number of random bytes in the hex suffix of a referral code
const CODE_SUFFIX_BYTES: usize = 4;

/// Generates time ordered v7 uuids and `WHITECOAT-XXXXXXXX` referral codes
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn new_id(&self) -> Uuid {
        Uuid::now_v7()
    }

    fn referral_code(&self) -> ReferralCode {
        let mut suffix = [0u8; CODE_SUFFIX_BYTES];
        rand::rng().fill_bytes(&mut suffix);
        ReferralCode::with_suffix(&hex::encode_upper(suffix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::REFERRAL_CODE_PREFIX;

    #[test]
    fn it_generates_prefixed_hex_codes() {
        let code = RandomIds.referral_code();
        let suffix = code.as_str().strip_prefix(REFERRAL_CODE_PREFIX).unwrap();
        assert_eq!(suffix.len(), CODE_SUFFIX_BYTES * 2);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn it_generates_distinct_ids() {
        assert_ne!(RandomIds.new_id(), RandomIds.new_id());
    }
}
