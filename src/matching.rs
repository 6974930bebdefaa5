//! Pure fuzzy matcher for slip recipients and extracted supplier names.
//!
//! No I/O here: the functions score strings against the in-session supplier
//! directory. Scores are fractions of the recipient's significant tokens that
//! appear in the supplier name, with a learned-alias exact match short-
//! circuiting to a perfect score.

use crate::contract::SupplierCandidate;

/// Minimum similarity at which a match is applied without prompting.
pub const AUTO_CONFIRM_THRESHOLD: f64 = 0.85;

/// Relative amount tolerance: amounts match when they differ by at most 1%
/// of the expected amount.
pub const AMOUNT_TOLERANCE: f64 = 0.01;

/// A scored supplier suggestion.
#[derive(Debug, Clone, PartialEq)]
pub struct SupplierMatch {
    pub id: String,
    pub name: String,
    pub score: f64,
}

/// True when `actual` is within the relative tolerance of `expected`.
pub fn amounts_match(expected: f64, actual: f64) -> bool {
    (expected - actual).abs() <= expected * AMOUNT_TOLERANCE
}

/// Case-insensitive bidirectional substring test, used for the exact-match
/// lane where either string may be the longer one.
pub fn names_overlap(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    a.contains(&b) || b.contains(&a)
}

/// Lowercased words longer than two characters. Short particles carry no
/// signal and would inflate scores.
fn tokens(value: &str) -> Vec<String> {
    value
        .to_lowercase()
        .split_whitespace()
        .filter(|w| w.len() > 2)
        .map(|w| w.to_string())
        .collect()
}

/// Score `recipient` against one supplier. An exact (case-insensitive) match
/// on the learned alias is a perfect score; otherwise the score is the
/// fraction of recipient tokens that appear in (or contain) a supplier-name
/// token.
pub fn name_similarity(recipient: &str, supplier_name: &str, alias: Option<&str>) -> f64 {
    if let Some(alias) = alias {
        if !alias.is_empty() && alias.to_lowercase() == recipient.to_lowercase() {
            return 1.0;
        }
    }
    let recipient_tokens = tokens(recipient);
    if recipient_tokens.is_empty() {
        return 0.0;
    }
    let supplier_tokens = tokens(supplier_name);
    let matched = recipient_tokens
        .iter()
        .filter(|rt| {
            supplier_tokens
                .iter()
                .any(|st| st.contains(rt.as_str()) || rt.contains(st.as_str()))
        })
        .count();
    matched as f64 / recipient_tokens.len() as f64
}

/// Best-scoring supplier for a recipient name, or `None` when nothing scores
/// above zero. Ties keep the first-seen candidate; an alias hit returns
/// immediately.
pub fn best_matching_supplier(
    recipient: &str,
    suppliers: &[SupplierCandidate],
) -> Option<SupplierMatch> {
    let mut best: Option<SupplierMatch> = None;
    for supplier in suppliers {
        let score = name_similarity(recipient, &supplier.name, supplier.bank_account_name.as_deref());
        if score == 1.0
            && supplier
                .bank_account_name
                .as_deref()
                .is_some_and(|a| a.to_lowercase() == recipient.to_lowercase())
        {
            return Some(SupplierMatch {
                id: supplier.id.clone(),
                name: supplier.name.clone(),
                score,
            });
        }
        if score > 0.0 && best.as_ref().is_none_or(|b| score > b.score) {
            best = Some(SupplierMatch {
                id: supplier.id.clone(),
                name: supplier.name.clone(),
                score,
            });
        }
    }
    best
}
