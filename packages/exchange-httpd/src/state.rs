use std::sync::Arc;

use exchange_core::denomination::InMemoryDenominationDirectory;
use exchange_core::error::WithdrawError;
use exchange_core::store::StoreError;
use exchange_db::PgStore;

use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<PgStore>,
    pub denominations: Arc<InMemoryDenominationDirectory>,
    pub metrics: Arc<Metrics>,
    pub exchange_base_url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Withdraw(#[from] WithdrawError),
    #[error("{0}")]
    BadRequest(String),
    #[error("not found")]
    NotFound,
    #[error("{0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Internal(e.to_string())
    }
}
