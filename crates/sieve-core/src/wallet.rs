//! Wallet records and the indexed wallet list.
//!
//! A wallet list is produced by the backend's file parser. Each record carries
//! an optional address plus the enriched metric groups; the metrics are kept as
//! raw JSON so they are forwarded to the generation request untouched.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One parsed wallet profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WalletRecord {
    /// On-chain address. Missing or empty for sheets without a wallet header.
    #[serde(default)]
    pub wallet_address: Option<String>,

    /// Every other field of the profile, preserved verbatim.
    #[serde(flatten)]
    pub metrics: Map<String, Value>,
}

impl WalletRecord {
    /// Creates a record with the given address and no metrics.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            wallet_address: Some(address.into()),
            metrics: Map::new(),
        }
    }

    /// Creates a record with no address.
    #[must_use]
    pub fn unaddressed() -> Self {
        Self::default()
    }

    /// Adds a metric field, replacing any previous value under `key`.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metrics.insert(key.into(), value);
        self
    }

    /// Returns the address if it is present and non-empty.
    #[must_use]
    pub fn address(&self) -> Option<&str> {
        self.wallet_address.as_deref().filter(|a| !a.is_empty())
    }

    /// Realized profit in SOL from the `performance_and_risk` group.
    #[must_use]
    pub fn pnl_sol(&self) -> Option<f64> {
        self.performance_metric("pnl_sol")
    }

    /// Return on investment in percent from the `performance_and_risk` group.
    #[must_use]
    pub fn roi_percent(&self) -> Option<f64> {
        self.performance_metric("roi_percent")
    }

    fn performance_metric(&self, name: &str) -> Option<f64> {
        self.metrics
            .get("performance_and_risk")
            .and_then(|group| group.get(name))
            .and_then(Value::as_f64)
    }

    /// One-line label: abbreviated address, `PnL` and `ROI`.
    ///
    /// ```
    /// use sieve_core::WalletRecord;
    /// use serde_json::json;
    ///
    /// let wallet = WalletRecord::new("9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin")
    ///     .with_field("performance_and_risk", json!({"pnl_sol": 12.5, "roi_percent": 48.21}));
    /// assert_eq!(wallet.label(), "9xQeWv...usVFin | PnL: 12.50 | ROI: 48.2%");
    /// ```
    #[must_use]
    pub fn label(&self) -> String {
        let short = self.address().map_or_else(
            || "N/A".to_string(),
            |address| {
                let chars: Vec<char> = address.chars().collect();
                if chars.len() <= 12 {
                    address.to_string()
                } else {
                    let head: String = chars[..6].iter().collect();
                    let tail: String = chars[chars.len() - 6..].iter().collect();
                    format!("{head}...{tail}")
                }
            },
        );
        format!(
            "{short} | PnL: {:.2} | ROI: {:.1}%",
            self.pnl_sol().unwrap_or(0.0),
            self.roi_percent().unwrap_or(0.0)
        )
    }
}

/// An immutable, positionally indexed list of wallets.
///
/// Indices are assigned by position at load time and never change for the
/// lifetime of the list. Replacing the list is the only way to change it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletList {
    records: Vec<WalletRecord>,
}

impl WalletList {
    /// Creates a list from records in upload order.
    #[must_use]
    pub const fn new(records: Vec<WalletRecord>) -> Self {
        Self { records }
    }

    /// Number of wallets in the list.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the list holds no wallets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the wallet at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&WalletRecord> {
        self.records.get(index)
    }

    /// Returns `true` if `index` addresses a wallet in this list.
    #[must_use]
    pub fn contains_index(&self, index: usize) -> bool {
        index < self.records.len()
    }

    /// Iterates wallets with their indices.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &WalletRecord)> {
        self.records.iter().enumerate()
    }

    /// All records in index order.
    #[must_use]
    pub fn records(&self) -> &[WalletRecord] {
        &self.records
    }

    /// Builds an address lookup over the current list.
    ///
    /// Addresses are not guaranteed unique, so each address maps to every
    /// index that carries it. Unaddressed wallets are left out.
    #[must_use]
    pub fn address_index(&self) -> HashMap<&str, Vec<usize>> {
        let mut lookup: HashMap<&str, Vec<usize>> = HashMap::with_capacity(self.records.len());
        for (index, record) in self.iter() {
            if let Some(address) = record.address() {
                lookup.entry(address).or_default().push(index);
            }
        }
        lookup
    }
}

impl From<Vec<WalletRecord>> for WalletList {
    fn from(records: Vec<WalletRecord>) -> Self {
        Self::new(records)
    }
}
