//! DomaRank valuation engine.
//!
//! Pure and deterministic: fixed inputs yield bit-identical outputs across
//! runs and machines. All arithmetic is exact `BigDecimal`; the only rounding
//! happens at the final wei conversion, half-to-even.

use alloy::primitives::U256;
use bigdecimal::num_bigint::BigInt;
use bigdecimal::{BigDecimal, RoundingMode};

/// Seconds in a Julian year (365.25 days).
const SECONDS_PER_YEAR: u64 = 31_557_600;

/// Names containing any of these score the premium keyword bonus.
const PREMIUM_KEYWORDS: &[&str] = &["crypto", "nft", "defi", "web3", "dao", "ai"];

/// Per-domain inputs to the engine. Derived from subgraph metadata by the
/// broadcaster; nothing else feeds the score.
#[derive(Debug, Clone)]
pub struct DomainMetrics {
    /// Full domain name, e.g. `crypto.io`.
    pub name: String,
    /// Suffix after the last dot, lowercased. Empty when the name has none.
    pub tld: String,
    /// Length of the label (the name without its TLD suffix).
    pub name_length: u32,
    pub years_on_chain: BigDecimal,
    pub years_until_expiry: BigDecimal,
    pub active_offers_count: u64,
    /// Live market price in USD.
    pub live_price_usd: BigDecimal,
}

/// Engine output for one token.
#[derive(Debug, Clone, PartialEq)]
pub struct Valuation {
    /// Composite score in `[0, 100]`.
    pub doma_rank: BigDecimal,
    /// Risk-adjusted valuation: `live_price_usd · doma_rank / 100`.
    pub valuation_usd: BigDecimal,
    /// `valuation_usd · 10^18`, rounded half-to-even.
    pub valuation_wei: U256,
}

/// Score a domain. Returns `None` when the valuation is below 10⁻¹⁸ USD —
/// sub-wei values must not be silently rounded to zero on-chain, so the token
/// is reported as having no valuation and the caller skips it.
pub fn evaluate(metrics: &DomainMetrics) -> Option<Valuation> {
    let rank = doma_rank(metrics);

    let usd = &metrics.live_price_usd * &rank / BigDecimal::from(100);
    let one_wei_usd = BigDecimal::new(BigInt::from(1), 18);
    if usd < one_wei_usd {
        return None;
    }

    let wei_scale = BigDecimal::new(BigInt::from(1), -18);
    let wei = (&usd * wei_scale).with_scale_round(0, RoundingMode::HalfEven);
    let (digits, exponent) = wei.as_bigint_and_exponent();
    debug_assert_eq!(exponent, 0);
    let wei = U256::from_str_radix(&digits.to_str_radix(10), 10).ok()?;

    Some(Valuation {
        doma_rank: rank,
        valuation_usd: usd,
        valuation_wei: wei,
    })
}

/// `clamp(2·A + 5·D + 3·K, 0, 100)`.
fn doma_rank(metrics: &DomainMetrics) -> BigDecimal {
    let age = age_score(&metrics.years_on_chain, &metrics.years_until_expiry);
    let demand = demand_score(metrics.active_offers_count);
    let keyword = composite_keyword_score(&metrics.name, &metrics.tld, metrics.name_length);

    let rank = BigDecimal::from(2) * age + BigDecimal::from(5) * demand + BigDecimal::from(3) * keyword;
    clamp(rank, BigDecimal::from(0), BigDecimal::from(100))
}

/// Age & longevity `A ∈ [0, 10]`:
/// `min(years_on_chain · 2, 5) + min(years_until_expiry, 5)`.
fn age_score(years_on_chain: &BigDecimal, years_until_expiry: &BigDecimal) -> BigDecimal {
    let five = BigDecimal::from(5);
    let on_chain = bd_min(years_on_chain * BigDecimal::from(2), five.clone());
    let until_expiry = bd_min(years_until_expiry.clone(), five);
    on_chain + until_expiry
}

/// Demand `D ∈ [0, 10]`: `min(active_offers · 2, 10)`.
fn demand_score(active_offers: u64) -> BigDecimal {
    BigDecimal::from(active_offers.saturating_mul(2).min(10))
}

/// Keyword/TLD/length `K ∈ [0, 10]`:
/// `0.5·tld + 0.3·keyword + 0.2·length`, computed as an exact tenth.
fn composite_keyword_score(name: &str, tld: &str, name_length: u32) -> BigDecimal {
    let weighted = 5 * u32::from(tld_score(tld))
        + 3 * u32::from(keyword_score(name))
        + 2 * u32::from(length_score(name_length));
    BigDecimal::from(weighted) / BigDecimal::from(10)
}

fn tld_score(tld: &str) -> u8 {
    match tld {
        "com" | "io" | "ai" => 10,
        "net" | "org" => 9,
        "xyz" => 8,
        _ => 5,
    }
}

fn keyword_score(name: &str) -> u8 {
    let lowered = name.to_lowercase();
    if PREMIUM_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
        10
    } else {
        4
    }
}

fn length_score(name_length: u32) -> u8 {
    if name_length <= 5 {
        10
    } else if name_length <= 10 {
        7
    } else {
        4
    }
}

/// Fractional years between two unix timestamps, zero when `to ≤ from`.
pub fn years_between(from_secs: u64, to_secs: u64) -> BigDecimal {
    if to_secs <= from_secs {
        return BigDecimal::from(0);
    }
    BigDecimal::from(to_secs - from_secs) / BigDecimal::from(SECONDS_PER_YEAR)
}

fn bd_min(a: BigDecimal, b: BigDecimal) -> BigDecimal {
    if a < b {
        a
    } else {
        b
    }
}

fn clamp(value: BigDecimal, lo: BigDecimal, hi: BigDecimal) -> BigDecimal {
    if value < lo {
        lo
    } else if value > hi {
        hi
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn metrics(
        name: &str,
        tld: &str,
        name_length: u32,
        years_on_chain: &str,
        years_until_expiry: &str,
        active_offers_count: u64,
        live_price_usd: &str,
    ) -> DomainMetrics {
        DomainMetrics {
            name: name.to_string(),
            tld: tld.to_string(),
            name_length,
            years_on_chain: BigDecimal::from_str(years_on_chain).unwrap(),
            years_until_expiry: BigDecimal::from_str(years_until_expiry).unwrap(),
            active_offers_count,
            live_price_usd: BigDecimal::from_str(live_price_usd).unwrap(),
        }
    }

    #[test]
    fn test_reference_valuation() {
        // crypto.io: A = 5+5, D = min(24,10), K = 5 + 3 + 1.4 = 9.4,
        // R = 20 + 50 + 28.2 = 98.2, V = 10000 · 0.982
        let m = metrics("crypto.io", "io", 6, "2.5", "8", 12, "10000");
        let v = evaluate(&m).unwrap();

        assert_eq!(v.doma_rank, BigDecimal::from_str("98.2").unwrap());
        assert_eq!(v.valuation_usd, BigDecimal::from_str("9820").unwrap());
        assert_eq!(
            v.valuation_wei,
            U256::from(9820u64) * U256::from(10u64).pow(U256::from(18u64))
        );
    }

    #[test]
    fn test_determinism() {
        let m = metrics("web3.xyz", "xyz", 4, "1.37", "3.21", 3, "123.456789");
        let a = evaluate(&m).unwrap();
        let b = evaluate(&m).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_zero_inputs_do_not_fault() {
        let m = metrics("house.dev", "dev", 5, "0", "8", 0, "100");
        let v = evaluate(&m).unwrap();
        // A = 0 + 5, D = 0, tld unknown -> 5, no keyword -> 4, len 5 -> 10:
        // K = 2.5 + 1.2 + 2 = 5.7, R = 10 + 0 + 17.1 = 27.1
        assert_eq!(v.doma_rank, BigDecimal::from_str("27.1").unwrap());
    }

    #[test]
    fn test_zero_price_yields_no_valuation() {
        let m = metrics("crypto.io", "io", 6, "2.5", "8", 12, "0");
        assert!(evaluate(&m).is_none());
    }

    #[test]
    fn test_sub_wei_valuation_is_skipped_not_zeroed() {
        let m = metrics("crypto.io", "io", 6, "2.5", "8", 12, "0.0000000000000000001");
        assert!(evaluate(&m).is_none());
    }

    #[test]
    fn test_rank_is_clamped_at_100() {
        // Max out every component: 2·10 + 5·10 + 3·10 = 100 exactly
        let m = metrics("defi.com", "com", 4, "10", "10", 50, "1");
        let v = evaluate(&m).unwrap();
        assert_eq!(v.doma_rank, BigDecimal::from(100));
        assert_eq!(v.valuation_usd, BigDecimal::from(1));
    }

    #[test]
    fn test_length_boundaries() {
        assert_eq!(length_score(1), 10);
        assert_eq!(length_score(5), 10);
        assert_eq!(length_score(6), 7);
        assert_eq!(length_score(10), 7);
        assert_eq!(length_score(11), 4);
    }

    #[test]
    fn test_tld_scores() {
        assert_eq!(tld_score("com"), 10);
        assert_eq!(tld_score("io"), 10);
        assert_eq!(tld_score("net"), 9);
        assert_eq!(tld_score("xyz"), 8);
        assert_eq!(tld_score("pizza"), 5);
        assert_eq!(tld_score(""), 5);
    }

    #[test]
    fn test_keyword_detection() {
        assert_eq!(keyword_score("CryptoPunks.io"), 10);
        assert_eq!(keyword_score("mydao.xyz"), 10);
        assert_eq!(keyword_score("flowers.net"), 4);
    }

    #[test]
    fn test_years_between() {
        assert_eq!(years_between(100, 100), BigDecimal::from(0));
        assert_eq!(years_between(200, 100), BigDecimal::from(0));
        assert_eq!(
            years_between(0, SECONDS_PER_YEAR * 2),
            BigDecimal::from(2)
        );
    }

    #[test]
    fn test_wei_rounding_half_to_even() {
        // 0.5 wei fractional part rounds to the even neighbor
        let value = BigDecimal::from_str("0.0000000000000000025").unwrap();
        let wei_scale = BigDecimal::new(BigInt::from(1), -18);
        let rounded = (value * wei_scale).with_scale_round(0, RoundingMode::HalfEven);
        assert_eq!(rounded, BigDecimal::from(2));
    }
}
