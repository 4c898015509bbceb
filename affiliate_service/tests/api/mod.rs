mod test_health;
mod test_referral_flow;
