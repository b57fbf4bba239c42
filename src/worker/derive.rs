//! Pure derivation of the enriched fields.
//!
//! Amounts arrive as stringified wei integers; the feed price is USD per
//! ETH. Everything here is deterministic so the same payload and price
//! always produce the same record, no matter which worker or attempt runs.

use crate::model::EventKind;
use anyhow::Context;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Convert a stringified wei amount to ETH.
pub fn wei_to_eth(raw: &str) -> anyhow::Result<Decimal> {
    let wei: u128 = raw
        .trim()
        .parse()
        .with_context(|| format!("not a wei integer: {:?}", raw))?;
    let wei = i128::try_from(wei).context("wei amount out of range")?;
    Decimal::try_from_i128_with_scale(wei, 18).context("wei amount out of range")
}

/// Whole-dollar USD value of an ETH amount, rounded half away from zero.
/// `None` when the product overflows the representable range.
pub fn usd_amount(eth: Decimal, price: Decimal) -> Option<i64> {
    eth.checked_mul(price)?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

/// Deterministic headline: "Noun #42 settled for 2.50 ETH ($5,000)".
/// Created events have no amount and stop after the event label.
pub fn headline(
    kind: EventKind,
    noun_id: u64,
    eth: Option<Decimal>,
    usd: Option<i64>,
) -> String {
    let mut headline = format!("Noun #{} {}", noun_id, kind.label());
    if let Some(eth) = eth {
        headline.push_str(&format!(" for {:.2} ETH", eth));
        if let Some(usd) = usd {
            headline.push_str(&format!(" (${})", format_usd(usd)));
        }
    }
    headline
}

/// Thousands-separated dollar amount: 5000 → "5,000".
pub fn format_usd(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if amount < 0 {
        format!("-{}", out)
    } else {
        out
    }
}

/// Parse a payload timestamp, substituting processing time when the field
/// is absent or unparseable.
pub fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_eth_bid_at_2500() {
        let eth = wei_to_eth("1000000000000000000").unwrap();
        assert_eq!(eth, Decimal::ONE);

        let usd = usd_amount(eth, Decimal::new(2500, 0));
        assert_eq!(usd, Some(2500));

        let headline = headline(EventKind::Bid, 42, Some(eth), usd);
        assert_eq!(headline, "Noun #42 bid for 1.00 ETH ($2,500)");
    }

    #[test]
    fn settled_auction_at_2000() {
        let eth = wei_to_eth("2500000000000000000").unwrap();
        let usd = usd_amount(eth, Decimal::new(2000, 0));
        assert_eq!(usd, Some(5000));

        let headline = headline(EventKind::Settled, 42, Some(eth), usd);
        assert!(headline.contains("Noun #42"));
        assert!(headline.contains("settled"));
        assert!(headline.contains("2.50"));
        assert!(headline.contains("$5,000"));
    }

    #[test]
    fn created_headline_has_no_amount() {
        assert_eq!(headline(EventKind::Created, 7, None, None), "Noun #7 created");
    }

    #[test]
    fn derivation_is_deterministic() {
        let eth = wei_to_eth("1000000000000000000").unwrap();
        let a = headline(EventKind::Bid, 42, Some(eth), usd_amount(eth, Decimal::new(2500, 0)));
        let b = headline(EventKind::Bid, 42, Some(eth), usd_amount(eth, Decimal::new(2500, 0)));
        assert_eq!(a, b);
    }

    #[test]
    fn usd_rounds_half_away_from_zero() {
        // 0.001 ETH × $2500 = $2.50 → rounds to 3, not banker's 2
        let eth = wei_to_eth("1000000000000000").unwrap();
        assert_eq!(usd_amount(eth, Decimal::new(2500, 0)), Some(3));
    }

    #[test]
    fn sub_dollar_amounts_round_to_zero() {
        let eth = wei_to_eth("100000000000000").unwrap(); // 0.0001 ETH
        assert_eq!(usd_amount(eth, Decimal::new(2000, 0)), Some(0));
    }

    #[test]
    fn thousands_separators() {
        assert_eq!(format_usd(0), "0");
        assert_eq!(format_usd(999), "999");
        assert_eq!(format_usd(5000), "5,000");
        assert_eq!(format_usd(1234567), "1,234,567");
    }

    #[test]
    fn rejects_malformed_wei() {
        assert!(wei_to_eth("").is_err());
        assert!(wei_to_eth("abc").is_err());
        assert!(wei_to_eth("1.5").is_err());
        assert!(wei_to_eth("-5").is_err());
    }

    #[test]
    fn fractional_eth_formats_to_two_places() {
        let eth = wei_to_eth("123456789000000000").unwrap(); // 0.123456789 ETH
        assert_eq!(format!("{:.2}", eth), "0.12");
    }

    #[test]
    fn timestamps_parse_or_fall_back_to_now() {
        let parsed = parse_timestamp(Some("2024-01-15T12:00:00.000Z"));
        assert_eq!(parsed.to_rfc3339(), "2024-01-15T12:00:00+00:00");

        let fallback = parse_timestamp(Some("not-a-date"));
        assert!((Utc::now() - fallback).num_seconds().abs() < 5);

        let absent = parse_timestamp(None);
        assert!((Utc::now() - absent).num_seconds().abs() < 5);
    }
}
