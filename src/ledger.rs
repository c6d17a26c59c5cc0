//! Ledger entries and the per-relationship running balance.
//!
//! `pending_due` is only ever written by a recompute over the full entry
//! history, inside the same store call that appends an entry.

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::LedgerError;
use crate::store::{Store, within_amount_range};
use crate::types::{EntryKind, EntryTotals, LedgerEntry, NewEntry, Relationship, Side, User};

pub const MAX_DESCRIPTION_CHARS: usize = 255;

/// Checks an entry against the caller's side and returns the amount at
/// two decimal places.
pub fn validate_entry(
    side: Side,
    kind: EntryKind,
    amount: Decimal,
    description: &str,
) -> Result<Decimal, LedgerError> {
    if !kind.permitted_for(side) {
        return Err(match side {
            Side::Customer => LedgerError::validation("customers can only record payments"),
            Side::Business => LedgerError::validation("businesses cannot record payments"),
        });
    }
    if amount.is_zero() {
        return Err(LedgerError::validation("amount must not be zero"));
    }
    if amount.normalize().scale() > 2 {
        return Err(LedgerError::validation(
            "amount must have at most two decimal places",
        ));
    }
    if !within_amount_range(amount) {
        return Err(LedgerError::validation("amount is out of range"));
    }
    if !kind.accepts_amount(amount) {
        let sign = if amount.is_sign_positive() {
            "positive"
        } else {
            "negative"
        };
        return Err(LedgerError::validation(format!(
            "{kind} entries cannot carry a {sign} amount"
        )));
    }
    if description.chars().count() > MAX_DESCRIPTION_CHARS {
        return Err(LedgerError::validation(format!(
            "description must be at most {MAX_DESCRIPTION_CHARS} characters"
        )));
    }

    let mut amount = amount;
    amount.rescale(2);
    Ok(amount)
}

/// Loads a relationship and the side `caller` stands on.
pub async fn relationship_for_caller(
    store: &dyn Store,
    caller: &User,
    relationship_id: i64,
) -> Result<(Relationship, Side), LedgerError> {
    let relationship = store
        .get_relationship(relationship_id)
        .await?
        .ok_or(LedgerError::NotFound("relationship"))?;
    let side = relationship
        .side_of(&caller.role)
        .ok_or_else(|| LedgerError::forbidden("you are not a party to this relationship"))?;
    Ok((relationship, side))
}

/// Records an entry and returns it with the relationship's new balance.
pub async fn create_entry(
    store: &dyn Store,
    caller: &User,
    entry: NewEntry,
) -> Result<(LedgerEntry, Decimal), LedgerError> {
    let (_, side) = relationship_for_caller(store, caller, entry.relationship_id).await?;
    let amount = validate_entry(side, entry.kind, entry.amount, &entry.description)?;

    let (created, pending_due) = store
        .insert_entry(NewEntry { amount, ..entry })
        .await?
        .ok_or(LedgerError::NotFound("relationship"))?;

    info!(
        relationship_id = created.relationship_id,
        entry_id = created.id,
        kind = %created.kind,
        amount = %created.amount,
        pending_due = %pending_due,
        "ledger entry recorded"
    );
    Ok((created, pending_due))
}

/// Entries visible to `caller`, newest first. With a relationship id the
/// caller must be a party to it.
pub async fn list_entries(
    store: &dyn Store,
    caller: &User,
    relationship_id: Option<i64>,
) -> Result<Vec<LedgerEntry>, LedgerError> {
    let ids = match relationship_id {
        Some(id) => {
            relationship_for_caller(store, caller, id).await?;
            vec![id]
        }
        None => caller_relationship_ids(store, caller).await?,
    };
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    Ok(store.list_entries(&ids).await?)
}

async fn caller_relationship_ids(store: &dyn Store, caller: &User) -> Result<Vec<i64>, LedgerError> {
    Ok(store
        .list_relationships(&caller.role)
        .await?
        .into_iter()
        .map(|r| r.id)
        .collect())
}

/// Re-derives one relationship's balance from its entries.
pub async fn recompute(store: &dyn Store, relationship_id: i64) -> Result<Decimal, LedgerError> {
    store
        .recompute_pending_due(relationship_id)
        .await?
        .ok_or(LedgerError::NotFound("relationship"))
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub checked: usize,
    pub corrected: usize,
}

/// Recomputes every relationship's balance, counting the ones that had
/// drifted from their entry history.
pub async fn reconcile(store: &dyn Store) -> Result<ReconcileReport, LedgerError> {
    let mut report = ReconcileReport::default();
    for id in store.list_all_relationship_ids().await? {
        let Some(before) = store.get_relationship(id).await? else {
            continue;
        };
        let Some(after) = store.recompute_pending_due(id).await? else {
            continue;
        };
        report.checked += 1;
        if before.pending_due != after {
            warn!(
                relationship_id = id,
                cached = %before.pending_due,
                derived = %after,
                "pending due corrected"
            );
            report.corrected += 1;
        }
    }
    Ok(report)
}

/// A relationship as seen by one of its parties.
#[derive(Debug, Clone, Serialize)]
pub struct RelationshipDetails {
    pub relationship: Relationship,
    pub counterpart: User,
    pub to_pay: Decimal,
    pub total_paid: Decimal,
    /// Only set when the caller is the customer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_favorite: Option<bool>,
    pub entries: Vec<LedgerEntry>,
}

pub async fn relationship_details(
    store: &dyn Store,
    caller: &User,
    relationship_id: i64,
) -> Result<RelationshipDetails, LedgerError> {
    let (relationship, side) = relationship_for_caller(store, caller, relationship_id).await?;

    let counterpart = match side {
        Side::Customer => store.find_user_by_business(relationship.business_id).await?,
        Side::Business => store.find_user_by_customer(relationship.customer_id).await?,
    }
    .ok_or(LedgerError::NotFound("user"))?;

    let is_favorite = match side {
        Side::Customer => Some(
            store
                .is_favorite(relationship.customer_id, relationship.business_id)
                .await?,
        ),
        Side::Business => None,
    };

    let totals = store.entry_totals(&[relationship.id]).await?;
    let entries = store.list_entries(&[relationship.id]).await?;

    Ok(RelationshipDetails {
        to_pay: relationship.pending_due,
        total_paid: two_places(totals.paid),
        relationship,
        counterpart,
        is_favorite,
        entries,
    })
}

/// Positive and negative entry totals over all of the caller's relationships.
pub async fn paid_vs_to_pay(store: &dyn Store, caller: &User) -> Result<EntryTotals, LedgerError> {
    let ids = caller_relationship_ids(store, caller).await?;
    let totals = if ids.is_empty() {
        EntryTotals::default()
    } else {
        store.entry_totals(&ids).await?
    };
    Ok(EntryTotals {
        to_pay: two_places(totals.to_pay),
        paid: two_places(totals.paid),
    })
}

fn two_places(mut value: Decimal) -> Decimal {
    value.rescale(2);
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn customer_cannot_record_purchases() {
        let err = validate_entry(Side::Customer, EntryKind::Purchase, dec!(10), "").unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn business_cannot_record_payments() {
        let err = validate_entry(Side::Business, EntryKind::Payment, dec!(-10), "").unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn amounts_are_normalised_to_two_places() {
        let amount =
            validate_entry(Side::Business, EntryKind::Purchase, dec!(12.5), "bread").unwrap();
        assert_eq!(amount.to_string(), "12.50");
        let amount =
            validate_entry(Side::Business, EntryKind::Purchase, dec!(3.100), "milk").unwrap();
        assert_eq!(amount.to_string(), "3.10");
    }

    #[test]
    fn malformed_amounts_are_rejected() {
        let cases = [
            (EntryKind::Purchase, dec!(0)),
            (EntryKind::Purchase, dec!(1.005)),
            (EntryKind::Purchase, dec!(10000000000)),
            (EntryKind::Purchase, dec!(-5)),
            (EntryKind::Refund, dec!(5)),
        ];
        for (kind, amount) in cases {
            assert!(
                validate_entry(Side::Business, kind, amount, "").is_err(),
                "{kind} {amount} should be rejected"
            );
        }
    }

    #[test]
    fn long_descriptions_are_rejected() {
        let description = "x".repeat(MAX_DESCRIPTION_CHARS + 1);
        assert!(validate_entry(Side::Business, EntryKind::Credit, dec!(1), &description).is_err());
        let description = "é".repeat(MAX_DESCRIPTION_CHARS);
        assert!(validate_entry(Side::Business, EntryKind::Credit, dec!(1), &description).is_ok());
    }
}
