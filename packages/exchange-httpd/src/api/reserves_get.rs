use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use exchange_core::base32;
use exchange_core::reserves::{get_reserve_details, ReserveLookup};

use crate::response::{HistoryEntryJson, ReserveStatusResponseBody};
use crate::state::{ApiError, AppState};

pub async fn handle(
    State(state): State<AppState>,
    Path(reserve_pub_path): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let reserve_pub = base32::decode_fixed::<32>(&reserve_pub_path)
        .map_err(|e| ApiError::BadRequest(format!("invalid reserve_pub: {e}")))?;

    let result = get_reserve_details(state.store.as_ref(), &reserve_pub).await?;

    match result {
        ReserveLookup::Found(details) => {
            state.metrics.record_reserve_lookup(200);
            Ok(Json(ReserveStatusResponseBody {
                balance: details.balance,
                history: details.history.iter().map(HistoryEntryJson::from).collect(),
            }))
        }
        ReserveLookup::NotFound => {
            state.metrics.record_reserve_lookup(404);
            Err(ApiError::NotFound)
        }
    }
}
