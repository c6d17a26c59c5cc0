use axum::{
    Extension, Router,
    extract::State,
    routing::get,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{ApiPath, ApiQuery, AppState, Caller, JsonBody};
use crate::error::ApiErrorWithMeta;
use crate::ledger::{self, RelationshipDetails};
use crate::responses::{ApiOk, RequestMeta};
use crate::types::{EntryKind, EntryTotals, LedgerEntry, NewEntry};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/transactions",
            get(list_entries_handler).post(create_entry_handler),
        )
        .route("/relationships/{id}", get(relationship_handler))
        .route("/analytics/paid-vs-to-pay", get(paid_vs_to_pay_handler))
}

/// The request to record a ledger entry.
#[derive(Deserialize)]
pub struct CreateEntryRequest {
    /// The relationship the entry belongs to.
    pub relationship_id: i64,
    /// Signed amount; positive means the customer owes more.
    pub amount: Decimal,
    /// The kind of entry.
    pub kind: EntryKind,
    /// Optional free text.
    #[serde(default)]
    pub description: String,
}

/// The response after recording an entry.
#[derive(Serialize)]
pub struct CreateEntryResponse {
    pub entry: LedgerEntry,
    /// The relationship balance after this entry.
    pub pending_due: Decimal,
}

#[derive(Deserialize)]
pub struct EntriesQuery {
    pub relationship_id: Option<i64>,
}

async fn create_entry_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Caller(user): Caller,
    JsonBody(req): JsonBody<CreateEntryRequest>,
) -> Result<ApiOk<CreateEntryResponse>, ApiErrorWithMeta> {
    let entry = NewEntry {
        relationship_id: req.relationship_id,
        amount: req.amount,
        kind: req.kind,
        description: req.description,
    };
    let (entry, pending_due) = ledger::create_entry(st.store.as_ref(), &user, entry)
        .await
        .map_err(|e| e.with_meta(meta.clone()))?;
    Ok(ApiOk::created(
        "transaction recorded",
        CreateEntryResponse { entry, pending_due },
        meta,
    ))
}

async fn list_entries_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Caller(user): Caller,
    ApiQuery(query): ApiQuery<EntriesQuery>,
) -> Result<ApiOk<Vec<LedgerEntry>>, ApiErrorWithMeta> {
    let entries = ledger::list_entries(st.store.as_ref(), &user, query.relationship_id)
        .await
        .map_err(|e| e.with_meta(meta.clone()))?;
    Ok(ApiOk::ok("transactions fetched", entries, meta))
}

async fn relationship_handler(
    State(st): State<AppState>,
    ApiPath(id): ApiPath<i64>,
    Extension(meta): Extension<RequestMeta>,
    Caller(user): Caller,
) -> Result<ApiOk<RelationshipDetails>, ApiErrorWithMeta> {
    let details = ledger::relationship_details(st.store.as_ref(), &user, id)
        .await
        .map_err(|e| e.with_meta(meta.clone()))?;
    Ok(ApiOk::ok("relationship fetched", details, meta))
}

async fn paid_vs_to_pay_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Caller(user): Caller,
) -> Result<ApiOk<EntryTotals>, ApiErrorWithMeta> {
    let totals = ledger::paid_vs_to_pay(st.store.as_ref(), &user)
        .await
        .map_err(|e| e.with_meta(meta.clone()))?;
    Ok(ApiOk::ok("totals fetched", totals, meta))
}
