use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use chrono::Utc;
use exchange_core::base32;
use exchange_core::withdraw::{handle_withdraw, WithdrawInput};
use tracing::info;

use crate::response::{WithdrawRequestBody, WithdrawResponseBody};
use crate::state::{ApiError, AppState};

pub async fn handle(
    State(state): State<AppState>,
    Path(reserve_pub_path): Path<String>,
    Json(body): Json<WithdrawRequestBody>,
) -> Result<impl IntoResponse, ApiError> {
    let reserve_pub = base32::decode_fixed::<32>(&reserve_pub_path)
        .map_err(|e| ApiError::BadRequest(format!("invalid reserve_pub in path: {e}")))?;
    let body_reserve_pub = base32::decode_fixed::<32>(&body.reserve_pub)
        .map_err(|e| ApiError::BadRequest(format!("invalid reserve_pub in body: {e}")))?;
    if reserve_pub != body_reserve_pub {
        return Err(ApiError::BadRequest(
            "reserve_pub in path does not match reserve_pub in body".to_string(),
        ));
    }
    let reserve_sig = base32::decode_fixed::<64>(&body.reserve_sig)
        .map_err(|e| ApiError::BadRequest(format!("invalid reserve_sig: {e}")))?;
    let denom_pub_hash = base32::decode_fixed::<64>(&body.denom_pub_hash)
        .map_err(|e| ApiError::BadRequest(format!("invalid denom_pub_hash: {e}")))?;
    let blinded_coin = base32::decode(&body.blinded_coin)
        .map_err(|e| ApiError::BadRequest(format!("invalid blinded_coin: {e}")))?;

    let input = WithdrawInput {
        reserve_pub,
        reserve_sig,
        denom_pub_hash,
        blinded_coin,
    };

    let result = handle_withdraw(
        state.store.as_ref(),
        state.denominations.as_ref(),
        input,
        Utc::now(),
    )
    .await;

    match &result {
        Ok(_) => state.metrics.record_withdraw(200),
        Err(e) => state.metrics.record_withdraw(e.http_status()),
    }

    let success = result?;
    info!(reserve_pub = %base32::encode(&reserve_pub), "withdraw served");
    Ok(Json(WithdrawResponseBody {
        blind_signature: base32::encode(&success.blind_signature),
    }))
}
