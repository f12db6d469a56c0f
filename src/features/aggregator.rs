//! Feature aggregation
//!
//! Pure transformation of a stored profile by one user event. Nothing here
//! touches a store or a clock: the caller supplies `now`, which stamps new
//! history entries and anchors the time-relative features.
//!
//! Chargeback and refund events carry no transaction reference, so they are
//! applied to the most recently appended transaction, an approximation.
//!
//! Replaying an event is not idempotent: a payment applied twice is counted
//! twice. Deduplication belongs upstream of the engine.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, VecDeque};

use super::model::{
    DerivedFeatures, LoginRecord, TransactionRecord, UserFeatureProfile, LOGIN_HISTORY_CAP,
    TRANSACTION_HISTORY_CAP,
};

/// Category recorded for payments that arrive without one
pub const UNCATEGORIZED: &str = "uncategorized";

/// A user event the aggregator understands
#[derive(Debug, Clone, PartialEq)]
pub enum UserEvent {
    Payment { amount: f64, category: String },
    Chargeback,
    Refund,
    AppConnection,
    Login {
        device_id: Option<String>,
        city: Option<String>,
        region: Option<String>,
    },
}

impl UserEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            UserEvent::Payment { .. } => "payment",
            UserEvent::Chargeback => "chargeback",
            UserEvent::Refund => "refund",
            UserEvent::AppConnection => "app_connection",
            UserEvent::Login { .. } => "login",
        }
    }
}

/// Apply one event to a profile and return the updated profile
pub fn apply_event(
    mut profile: UserFeatureProfile,
    event: &UserEvent,
    now: DateTime<Utc>,
) -> UserFeatureProfile {
    if profile.first_seen_at.is_none() {
        profile.first_seen_at = Some(now);
    }

    match event {
        UserEvent::Payment { amount, category } => {
            push_bounded(
                &mut profile.transactions,
                TransactionRecord {
                    timestamp: now,
                    amount: *amount,
                    category: category.clone(),
                    refunded: false,
                    chargeback: false,
                },
                TRANSACTION_HISTORY_CAP,
            );
            profile.pix_volume += amount;
            profile.total_transactions += 1;
            profile.avg_transaction_value =
                safe_ratio(profile.pix_volume, profile.total_transactions as f64);
            profile.last_transaction_date = Some(now);
        }
        UserEvent::Chargeback => {
            if let Some(last) = profile.transactions.back_mut() {
                last.chargeback = true;
            }
            profile.total_chargebacks += 1;
            profile.chargeback_rate = profile.total_chargebacks as f64
                / profile.total_transactions.max(1) as f64;
        }
        UserEvent::Refund => {
            if let Some(last) = profile.transactions.back_mut() {
                last.refunded = true;
            }
        }
        UserEvent::AppConnection => {
            profile.app_connections += 1;
        }
        UserEvent::Login {
            device_id,
            city,
            region,
        } => {
            push_bounded(
                &mut profile.logins,
                LoginRecord {
                    timestamp: now,
                    device_id: device_id.clone(),
                    city: city.clone(),
                    region: region.clone(),
                },
                LOGIN_HISTORY_CAP,
            );
        }
    }

    recompute(&mut profile, now);
    profile
}

/// Refresh every history-dependent field of `profile` as of `now`
pub fn recompute(profile: &mut UserFeatureProfile, now: DateTime<Utc>) {
    profile.account_age_days = profile
        .first_seen_at
        .map(|first| (now - first).num_days().max(0))
        .unwrap_or(0);
    profile.derived = derive_features(&profile.transactions, &profile.logins, now);
}

/// Windowed statistics over the retained histories
pub fn derive_features(
    transactions: &VecDeque<TransactionRecord>,
    logins: &VecDeque<LoginRecord>,
    now: DateTime<Utc>,
) -> DerivedFeatures {
    let mut timestamps: Vec<DateTime<Utc>> = transactions.iter().map(|t| t.timestamp).collect();
    timestamps.sort();

    let window = transactions.len() as f64;
    let refunded: Vec<f64> = transactions
        .iter()
        .filter(|t| t.refunded)
        .map(|t| t.amount)
        .collect();

    DerivedFeatures {
        mean_interval_hours: mean_interval_hours(&timestamps),
        transaction_frequency: transaction_frequency(&timestamps),
        category_diversity: transactions
            .iter()
            .map(|t| t.category.as_str())
            .collect::<BTreeSet<_>>()
            .len() as u32,
        geo_dispersion: logins
            .iter()
            .map(|l| (l.city.as_deref(), l.region.as_deref()))
            .collect::<BTreeSet<_>>()
            .len() as u32,
        refund_frequency: safe_ratio(refunded.len() as f64, window),
        device_change_count: device_change_count(logins),
        days_since_last_transaction: timestamps
            .last()
            .map(|last| (now - *last).num_days().max(0))
            .unwrap_or(0),
        window_chargeback_count: transactions.iter().filter(|t| t.chargeback).count() as u32,
        mean_refunded_amount: safe_ratio(refunded.iter().sum(), refunded.len() as f64),
    }
}

fn push_bounded<T>(history: &mut VecDeque<T>, entry: T, cap: usize) {
    history.push_back(entry);
    while history.len() > cap {
        history.pop_front();
    }
}

fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

fn mean_interval_hours(sorted: &[DateTime<Utc>]) -> f64 {
    if sorted.len() < 2 {
        return 0.0;
    }
    let total_ms: i64 = sorted
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).num_milliseconds())
        .sum();
    safe_ratio(total_ms as f64 / 3_600_000.0, (sorted.len() - 1) as f64)
}

/// Retained transactions per day of window span; spans shorter than a day count as one
fn transaction_frequency(sorted: &[DateTime<Utc>]) -> f64 {
    match (sorted.first(), sorted.last()) {
        (Some(first), Some(last)) => {
            let span_days = (*last - *first).num_seconds() as f64 / 86_400.0;
            sorted.len() as f64 / span_days.max(1.0)
        }
        _ => 0.0,
    }
}

fn device_change_count(logins: &VecDeque<LoginRecord>) -> u32 {
    let mut ordered: Vec<&LoginRecord> = logins.iter().collect();
    // stable: logins sharing a timestamp keep insertion order
    ordered.sort_by_key(|l| l.timestamp);
    ordered
        .windows(2)
        .filter(|pair| pair[0].device_id != pair[1].device_id)
        .count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn payment(amount: f64, category: &str) -> UserEvent {
        UserEvent::Payment {
            amount,
            category: category.to_string(),
        }
    }

    fn login(device: &str, city: &str, region: &str) -> UserEvent {
        UserEvent::Login {
            device_id: Some(device.to_string()),
            city: Some(city.to_string()),
            region: Some(region.to_string()),
        }
    }

    #[test]
    fn test_payments_accumulate_volume_and_average() {
        let mut profile = UserFeatureProfile::default();
        for (i, amount) in [100.0, 200.0, 300.0].into_iter().enumerate() {
            profile = apply_event(profile, &payment(amount, "food"), t0() + Duration::hours(i as i64));
        }

        assert_eq!(profile.pix_volume, 600.0);
        assert_eq!(profile.total_transactions, 3);
        assert_eq!(profile.avg_transaction_value, 200.0);
        assert_eq!(profile.transactions.len(), 3);
        assert_eq!(profile.last_transaction_date, Some(t0() + Duration::hours(2)));
    }

    #[test]
    fn test_replayed_payment_is_counted_twice() {
        let event = payment(250.0, "food");
        let once = apply_event(UserFeatureProfile::default(), &event, t0());
        let twice = apply_event(once.clone(), &event, t0());

        assert_eq!(twice.pix_volume, once.pix_volume * 2.0);
        assert_eq!(twice.total_transactions, 2);
    }

    #[test]
    fn test_chargeback_marks_last_transaction() {
        let profile = apply_event(UserFeatureProfile::default(), &payment(50.0, "food"), t0());
        let profile = apply_event(profile, &UserEvent::Chargeback, t0());

        assert!(profile.transactions.back().unwrap().chargeback);
        assert_eq!(profile.total_chargebacks, 1);
        assert_eq!(profile.chargeback_rate, 1.0);
        assert_eq!(profile.derived.window_chargeback_count, 1);
    }

    #[test]
    fn test_chargeback_only_touches_most_recent_transaction() {
        let mut profile = UserFeatureProfile::default();
        profile = apply_event(profile, &payment(10.0, "a"), t0());
        profile = apply_event(profile, &payment(20.0, "b"), t0());
        profile = apply_event(profile, &UserEvent::Chargeback, t0());

        assert!(!profile.transactions[0].chargeback);
        assert!(profile.transactions[1].chargeback);
        assert_eq!(profile.chargeback_rate, 0.5);
    }

    #[test]
    fn test_chargeback_without_transactions_uses_unit_denominator() {
        let profile = apply_event(UserFeatureProfile::default(), &UserEvent::Chargeback, t0());

        assert_eq!(profile.total_chargebacks, 1);
        assert_eq!(profile.chargeback_rate, 1.0);
        assert!(profile.transactions.is_empty());
    }

    #[test]
    fn test_refund_marks_last_transaction_and_updates_refund_stats() {
        let mut profile = UserFeatureProfile::default();
        profile = apply_event(profile, &payment(40.0, "a"), t0());
        profile = apply_event(profile, &payment(60.0, "a"), t0());
        profile = apply_event(profile, &UserEvent::Refund, t0());

        assert!(!profile.transactions[0].refunded);
        assert!(profile.transactions[1].refunded);
        assert_eq!(profile.derived.refund_frequency, 0.5);
        assert_eq!(profile.derived.mean_refunded_amount, 60.0);
    }

    #[test]
    fn test_app_connection_leaves_histories_alone() {
        let profile = apply_event(UserFeatureProfile::default(), &UserEvent::AppConnection, t0());
        let profile = apply_event(profile, &UserEvent::AppConnection, t0());

        assert_eq!(profile.app_connections, 2);
        assert!(profile.transactions.is_empty());
        assert!(profile.logins.is_empty());
    }

    #[test]
    fn test_transaction_window_evicts_oldest_first() {
        let mut profile = UserFeatureProfile::default();
        for i in 0..(TRANSACTION_HISTORY_CAP + 5) {
            profile = apply_event(profile, &payment(i as f64, "x"), t0());
        }

        assert_eq!(profile.transactions.len(), TRANSACTION_HISTORY_CAP);
        assert_eq!(profile.transactions.front().unwrap().amount, 5.0);
        assert_eq!(
            profile.transactions.back().unwrap().amount,
            (TRANSACTION_HISTORY_CAP + 4) as f64
        );
        // lifetime counters are not windowed
        assert_eq!(profile.total_transactions, (TRANSACTION_HISTORY_CAP + 5) as u64);
    }

    #[test]
    fn test_eviction_follows_insertion_not_timestamp() {
        let mut profile = UserFeatureProfile::default();
        // first event arrives with the latest clock reading
        profile = apply_event(profile, &payment(-1.0, "late"), t0() + Duration::days(30));
        for i in 0..TRANSACTION_HISTORY_CAP {
            profile = apply_event(profile, &payment(i as f64, "x"), t0());
        }

        assert!(profile.transactions.iter().all(|t| t.category != "late"));
    }

    #[test]
    fn test_distinct_device_logins_keep_ten_and_count_nine_changes() {
        let mut profile = UserFeatureProfile::default();
        for i in 0..25 {
            profile = apply_event(profile, &login(&format!("device-{i}"), "Recife", "PE"), t0());
        }

        assert_eq!(profile.logins.len(), LOGIN_HISTORY_CAP);
        assert_eq!(profile.derived.device_change_count, 9);
        assert_eq!(profile.logins.front().unwrap().device_id.as_deref(), Some("device-15"));
    }

    #[test]
    fn test_device_changes_follow_timestamp_order() {
        let mut logins = VecDeque::new();
        for (minutes, device) in [(0, "a"), (20, "a"), (10, "b")] {
            logins.push_back(LoginRecord {
                timestamp: t0() + Duration::minutes(minutes),
                device_id: Some(device.to_string()),
                city: None,
                region: None,
            });
        }
        // sorted: a, b, a
        let derived = derive_features(&VecDeque::new(), &logins, t0());
        assert_eq!(derived.device_change_count, 2);
    }

    #[test]
    fn test_geo_dispersion_counts_city_region_pairs() {
        let mut profile = UserFeatureProfile::default();
        profile = apply_event(profile, &login("d", "Recife", "PE"), t0());
        profile = apply_event(profile, &login("d", "Recife", "PE"), t0());
        profile = apply_event(profile, &login("d", "Olinda", "PE"), t0());
        profile = apply_event(profile, &login("d", "Recife", "SP"), t0());

        assert_eq!(profile.derived.geo_dispersion, 3);
        assert_eq!(profile.derived.device_change_count, 0);
    }

    #[test]
    fn test_empty_windows_yield_zero_features() {
        let derived = derive_features(&VecDeque::new(), &VecDeque::new(), t0());
        assert_eq!(derived, DerivedFeatures::default());
        assert_eq!(derived.mean_interval_hours, 0.0);
        assert_eq!(derived.refund_frequency, 0.0);
        assert_eq!(derived.mean_refunded_amount, 0.0);

        let profile = UserFeatureProfile::default();
        assert_eq!(profile.chargeback_rate, 0.0);
    }

    #[test]
    fn test_mean_interval_and_category_diversity() {
        let mut profile = UserFeatureProfile::default();
        profile = apply_event(profile, &payment(1.0, "food"), t0());
        profile = apply_event(profile, &payment(1.0, "travel"), t0() + Duration::hours(2));
        profile = apply_event(profile, &payment(1.0, "food"), t0() + Duration::hours(6));

        assert_eq!(profile.derived.mean_interval_hours, 3.0);
        assert_eq!(profile.derived.category_diversity, 2);
    }

    #[test]
    fn test_time_relative_features() {
        let mut profile = UserFeatureProfile::default();
        profile = apply_event(profile, &payment(1.0, "food"), t0());
        profile = apply_event(profile, &UserEvent::AppConnection, t0() + Duration::days(3));

        assert_eq!(profile.derived.days_since_last_transaction, 3);
        assert_eq!(profile.account_age_days, 3);
    }

    #[test]
    fn test_transaction_frequency_floors_span_at_one_day() {
        let mut profile = UserFeatureProfile::default();
        profile = apply_event(profile, &payment(1.0, "a"), t0());
        profile = apply_event(profile, &payment(1.0, "a"), t0() + Duration::hours(1));
        assert_eq!(profile.derived.transaction_frequency, 2.0);

        profile = apply_event(profile, &payment(1.0, "a"), t0() + Duration::days(4));
        assert_eq!(profile.derived.transaction_frequency, 0.75);
    }

    #[test]
    fn test_recompute_is_deterministic_from_history() {
        let mut profile = UserFeatureProfile::default();
        profile = apply_event(profile, &payment(10.0, "a"), t0());
        profile = apply_event(profile, &UserEvent::Refund, t0());
        profile = apply_event(profile, &login("d1", "Recife", "PE"), t0());
        profile = apply_event(profile, &login("d2", "Recife", "PE"), t0());

        let mut rebuilt = profile.clone();
        rebuilt.derived = DerivedFeatures::default();
        recompute(&mut rebuilt, t0());
        assert_eq!(rebuilt, profile);
    }
}
