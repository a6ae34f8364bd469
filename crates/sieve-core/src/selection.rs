//! Positive-example selection kept consistent across two views.
//!
//! The operator can mark wallets either one at a time (the per-index toggle
//! view) or by pasting a list of addresses (the bulk text view). [`Session`]
//! owns the wallet list and the selected index set, and both views are derived
//! from and written back through it, so neither view can drift from the other.
//!
//! Wallets without an address cannot be written as text, so they are kept out
//! of both views: the text path never matches them and toggling one on is
//! refused with [`ToggleOutcome::Unaddressable`].
//!
//! # Example
//!
//! ```
//! use sieve_core::{Session, WalletList, WalletRecord};
//!
//! let mut session = Session::new();
//! session.load_wallets(WalletList::new(vec![
//!     WalletRecord::new("AAA"),
//!     WalletRecord::new("BBB"),
//!     WalletRecord::new(""),
//! ]));
//!
//! session.apply_address_list("AAA\nCCC");
//! assert_eq!(session.project_to_address_list(), vec!["AAA"]);
//! assert_eq!(session.selected_indices(), vec![0]);
//! ```

use std::collections::{BTreeSet, HashSet};

use serde::Serialize;
use tracing::debug;

use crate::wallet::{WalletList, WalletRecord};

/// Splits bulk address text into tokens.
///
/// Tokens are separated by any run of whitespace, commas, semicolons or pipes.
/// Empty tokens are dropped; order and duplicates are preserved.
pub fn parse_address_tokens(raw: &str) -> Vec<&str> {
    raw.split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | '|'))
        .filter(|token| !token.is_empty())
        .collect()
}

/// Summary of an [`Session::apply_address_list`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    /// Number of wallets selected after the call.
    pub selected: usize,
    /// Distinct tokens that matched no wallet, in first-seen order.
    pub unmatched: Vec<String>,
}

/// Result of a single-index toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ToggleOutcome {
    /// The selection changed.
    Applied,
    /// The index was already in the requested state.
    Unchanged,
    /// The index is not a position in the current wallet list, typically
    /// because the list was replaced since the view was rendered.
    OutOfRange {
        /// The rejected index.
        index: usize,
        /// Length of the current wallet list.
        len: usize,
    },
    /// The wallet has no address and cannot be represented in the text view.
    Unaddressable {
        /// The rejected index.
        index: usize,
    },
}

impl ToggleOutcome {
    /// Returns `true` if the request was honored (changed or already so).
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Applied | Self::Unchanged)
    }
}

/// The loaded wallet list together with its positive-example selection.
///
/// Invariant: every selected index is a valid, addressed position in
/// `wallets`. Replacing the list through [`Session::load_wallets`] clears the
/// selection.
#[derive(Debug, Clone, Default)]
pub struct Session {
    wallets: WalletList,
    selected: BTreeSet<usize>,
}

impl Session {
    /// Creates an empty session with no wallets loaded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a session over an already-loaded wallet list.
    #[must_use]
    pub fn with_wallets(wallets: WalletList) -> Self {
        Self {
            wallets,
            selected: BTreeSet::new(),
        }
    }

    /// Replaces the wallet list and clears the selection.
    pub fn load_wallets(&mut self, wallets: WalletList) {
        debug!(
            previous = self.wallets.len(),
            loaded = wallets.len(),
            "Replacing wallet list"
        );
        self.wallets = wallets;
        self.reset();
    }

    /// The current wallet list.
    #[must_use]
    pub const fn wallets(&self) -> &WalletList {
        &self.wallets
    }

    /// Replaces the selection with the wallets named in `raw_text`.
    ///
    /// Every wallet whose address equals one of the tokens is selected and
    /// every other wallet is deselected. Matching is exact and
    /// case-sensitive.
    pub fn apply_address_list(&mut self, raw_text: &str) -> ApplyReport {
        let lookup = self.wallets.address_index();

        self.selected.clear();
        let mut unmatched = Vec::new();
        let mut seen = HashSet::new();
        for token in parse_address_tokens(raw_text) {
            if !seen.insert(token) {
                continue;
            }
            match lookup.get(token) {
                Some(indices) => self.selected.extend(indices.iter().copied()),
                None => unmatched.push(token.to_string()),
            }
        }

        debug!(
            distinct_tokens = seen.len(),
            selected = self.selected.len(),
            unmatched = unmatched.len(),
            "Applied address list"
        );

        ApplyReport {
            selected: self.selected.len(),
            unmatched,
        }
    }

    /// Adds or removes a single index, leaving every other index untouched.
    pub fn toggle_by_index(&mut self, index: usize, selected: bool) -> ToggleOutcome {
        let Some(record) = self.wallets.get(index) else {
            return ToggleOutcome::OutOfRange {
                index,
                len: self.wallets.len(),
            };
        };

        if selected && record.address().is_none() {
            return ToggleOutcome::Unaddressable { index };
        }

        let changed = if selected {
            self.selected.insert(index)
        } else {
            self.selected.remove(&index)
        };

        if changed {
            ToggleOutcome::Applied
        } else {
            ToggleOutcome::Unchanged
        }
    }

    /// Addresses of the selected wallets in ascending index order.
    #[must_use]
    pub fn project_to_address_list(&self) -> Vec<&str> {
        self.selected
            .iter()
            .filter_map(|&index| self.wallets.get(index).and_then(WalletRecord::address))
            .collect()
    }

    /// The text view: one selected address per line.
    #[must_use]
    pub fn address_text(&self) -> String {
        self.project_to_address_list().join("\n")
    }

    /// Clears the selection.
    pub fn reset(&mut self) {
        self.selected.clear();
    }

    /// Returns `true` if `index` is currently selected.
    #[must_use]
    pub fn is_selected(&self, index: usize) -> bool {
        self.selected.contains(&index)
    }

    /// Number of selected wallets.
    #[must_use]
    pub fn selected_count(&self) -> usize {
        self.selected.len()
    }

    /// Selected indices in ascending order.
    #[must_use]
    pub fn selected_indices(&self) -> Vec<usize> {
        self.selected.iter().copied().collect()
    }

    /// Selected wallet records in ascending index order.
    #[must_use]
    pub fn selected_wallets(&self) -> Vec<WalletRecord> {
        self.selected
            .iter()
            .filter_map(|&index| self.wallets.get(index).cloned())
            .collect()
    }
}
