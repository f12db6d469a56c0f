//! Feature profile models and the typed feature map

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;

/// Transactions retained in a profile's window
pub const TRANSACTION_HISTORY_CAP: usize = 20;

/// Logins retained in a profile's window
pub const LOGIN_HISTORY_CAP: usize = 10;

/// Closed set of features the engine knows how to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureName {
    PixVolume,
    TotalTransactions,
    AvgTransactionValue,
    TransactionFrequency,
    TotalChargebacks,
    ChargebackRate,
    AppConnections,
    AccountAgeDays,
    MeanIntervalHours,
    CategoryDiversity,
    GeoDispersion,
    RefundFrequency,
    DeviceChangeCount,
    DaysSinceLastTransaction,
    WindowChargebackCount,
    MeanRefundedAmount,
}

impl FeatureName {
    pub const ALL: [FeatureName; 16] = [
        FeatureName::PixVolume,
        FeatureName::TotalTransactions,
        FeatureName::AvgTransactionValue,
        FeatureName::TransactionFrequency,
        FeatureName::TotalChargebacks,
        FeatureName::ChargebackRate,
        FeatureName::AppConnections,
        FeatureName::AccountAgeDays,
        FeatureName::MeanIntervalHours,
        FeatureName::CategoryDiversity,
        FeatureName::GeoDispersion,
        FeatureName::RefundFrequency,
        FeatureName::DeviceChangeCount,
        FeatureName::DaysSinceLastTransaction,
        FeatureName::WindowChargebackCount,
        FeatureName::MeanRefundedAmount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureName::PixVolume => "pix_volume",
            FeatureName::TotalTransactions => "total_transactions",
            FeatureName::AvgTransactionValue => "avg_transaction_value",
            FeatureName::TransactionFrequency => "transaction_frequency",
            FeatureName::TotalChargebacks => "total_chargebacks",
            FeatureName::ChargebackRate => "chargeback_rate",
            FeatureName::AppConnections => "app_connections",
            FeatureName::AccountAgeDays => "account_age_days",
            FeatureName::MeanIntervalHours => "mean_interval_hours",
            FeatureName::CategoryDiversity => "category_diversity",
            FeatureName::GeoDispersion => "geo_dispersion",
            FeatureName::RefundFrequency => "refund_frequency",
            FeatureName::DeviceChangeCount => "device_change_count",
            FeatureName::DaysSinceLastTransaction => "days_since_last_transaction",
            FeatureName::WindowChargebackCount => "window_chargeback_count",
            FeatureName::MeanRefundedAmount => "mean_refunded_amount",
        }
    }
}

impl fmt::Display for FeatureName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureName {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FeatureName::ALL
            .iter()
            .copied()
            .find(|name| name.as_str() == s)
            .ok_or(())
    }
}

/// Numeric feature map: well-known features keyed by `FeatureName`, plus
/// caller-supplied extension fields that the engine does not interpret.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureSet {
    known: BTreeMap<FeatureName, f64>,
    extra: BTreeMap<String, f64>,
}

impl FeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: FeatureName, value: f64) {
        self.known.insert(name, value);
    }

    /// Insert by string key, routing to the typed map when the key is known
    pub fn insert(&mut self, key: &str, value: f64) {
        match key.parse::<FeatureName>() {
            Ok(name) => {
                self.known.insert(name, value);
            }
            Err(()) => {
                self.extra.insert(key.to_string(), value);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        match key.parse::<FeatureName>() {
            Ok(name) => self.known.get(&name).copied(),
            Err(()) => self.extra.get(key).copied(),
        }
    }

    pub fn get_known(&self, name: FeatureName) -> Option<f64> {
        self.known.get(&name).copied()
    }

    /// Overlay `other` on top of `self`; keys in `other` win.
    pub fn merge(&mut self, other: FeatureSet) {
        self.known.extend(other.known);
        self.extra.extend(other.extra);
    }

    pub fn len(&self) -> usize {
        self.known.len() + self.extra.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty() && self.extra.is_empty()
    }

    /// Known features in declaration order, then extension fields by name
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.known
            .iter()
            .map(|(name, value)| (name.as_str(), *value))
            .chain(self.extra.iter().map(|(key, value)| (key.as_str(), *value)))
    }

    pub fn names(&self) -> Vec<String> {
        self.iter().map(|(key, _)| key.to_string()).collect()
    }

    /// Flat snapshot used for persistence and responses
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        self.iter().map(|(key, value)| (key.to_string(), value)).collect()
    }
}

impl FromIterator<(String, f64)> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        let mut set = FeatureSet::new();
        for (key, value) in iter {
            set.insert(&key, value);
        }
        set
    }
}

/// One retained transaction in the profile window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub timestamp: DateTime<Utc>,
    pub amount: f64,
    pub category: String,
    pub refunded: bool,
    pub chargeback: bool,
}

/// One retained login in the profile window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginRecord {
    pub timestamp: DateTime<Utc>,
    pub device_id: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
}

/// Statistics recomputed from the retained windows on every update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DerivedFeatures {
    pub mean_interval_hours: f64,
    pub transaction_frequency: f64,
    pub category_diversity: u32,
    pub geo_dispersion: u32,
    pub refund_frequency: f64,
    pub device_change_count: u32,
    pub days_since_last_transaction: i64,
    pub window_chargeback_count: u32,
    pub mean_refunded_amount: f64,
}

/// Aggregated per-user feature record consumed by scoring
///
/// The default value is the profile of a user the engine has never seen.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserFeatureProfile {
    pub pix_volume: f64,
    pub total_transactions: u64,
    pub avg_transaction_value: f64,
    pub total_chargebacks: u64,
    pub chargeback_rate: f64,
    pub app_connections: u64,
    pub account_age_days: i64,
    pub first_seen_at: Option<DateTime<Utc>>,
    pub last_transaction_date: Option<DateTime<Utc>>,
    pub transactions: VecDeque<TransactionRecord>,
    pub logins: VecDeque<LoginRecord>,
    pub derived: DerivedFeatures,
}

impl UserFeatureProfile {
    /// Project the profile onto the typed feature map used by the model
    pub fn to_feature_set(&self) -> FeatureSet {
        let mut set = FeatureSet::new();
        set.set(FeatureName::PixVolume, self.pix_volume);
        set.set(FeatureName::TotalTransactions, self.total_transactions as f64);
        set.set(FeatureName::AvgTransactionValue, self.avg_transaction_value);
        set.set(
            FeatureName::TransactionFrequency,
            self.derived.transaction_frequency,
        );
        set.set(FeatureName::TotalChargebacks, self.total_chargebacks as f64);
        set.set(FeatureName::ChargebackRate, self.chargeback_rate);
        set.set(FeatureName::AppConnections, self.app_connections as f64);
        set.set(FeatureName::AccountAgeDays, self.account_age_days as f64);
        set.set(FeatureName::MeanIntervalHours, self.derived.mean_interval_hours);
        set.set(
            FeatureName::CategoryDiversity,
            self.derived.category_diversity as f64,
        );
        set.set(FeatureName::GeoDispersion, self.derived.geo_dispersion as f64);
        set.set(FeatureName::RefundFrequency, self.derived.refund_frequency);
        set.set(
            FeatureName::DeviceChangeCount,
            self.derived.device_change_count as f64,
        );
        set.set(
            FeatureName::DaysSinceLastTransaction,
            self.derived.days_since_last_transaction as f64,
        );
        set.set(
            FeatureName::WindowChargebackCount,
            self.derived.window_chargeback_count as f64,
        );
        set.set(
            FeatureName::MeanRefundedAmount,
            self.derived.mean_refunded_amount,
        );
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_name_round_trips_through_str() {
        for name in FeatureName::ALL {
            assert_eq!(name.as_str().parse::<FeatureName>(), Ok(name));
        }
        assert!("pagou_pix".parse::<FeatureName>().is_err());
    }

    #[test]
    fn test_feature_name_serde_matches_as_str() {
        let json = serde_json::to_string(&FeatureName::DeviceChangeCount).unwrap();
        assert_eq!(json, "\"device_change_count\"");
    }

    #[test]
    fn test_insert_routes_unknown_keys_to_extra() {
        let mut set = FeatureSet::new();
        set.insert("pix_volume", 10.0);
        set.insert("late_deliveries", 2.0);

        assert_eq!(set.get_known(FeatureName::PixVolume), Some(10.0));
        assert_eq!(set.get("late_deliveries"), Some(2.0));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_merge_prefers_incoming_values() {
        let mut base = FeatureSet::new();
        base.set(FeatureName::PixVolume, 100.0);
        base.set(FeatureName::AppConnections, 2.0);

        let mut overlay = FeatureSet::new();
        overlay.insert("pix_volume", 5.0);
        overlay.insert("late_deliveries", 1.0);

        base.merge(overlay);
        assert_eq!(base.get("pix_volume"), Some(5.0));
        assert_eq!(base.get("app_connections"), Some(2.0));
        assert_eq!(base.get("late_deliveries"), Some(1.0));
    }

    #[test]
    fn test_default_profile_projects_every_known_feature_as_zero() {
        let set = UserFeatureProfile::default().to_feature_set();
        assert_eq!(set.len(), FeatureName::ALL.len());
        assert!(set.iter().all(|(_, value)| value == 0.0));
    }

    #[test]
    fn test_profile_deserializes_from_partial_record() {
        let profile: UserFeatureProfile =
            serde_json::from_str(r#"{"pix_volume": 42.0, "total_transactions": 1}"#).unwrap();
        assert_eq!(profile.pix_volume, 42.0);
        assert_eq!(profile.total_transactions, 1);
        assert!(profile.transactions.is_empty());
    }
}
