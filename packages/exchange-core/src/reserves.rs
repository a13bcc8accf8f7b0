//! Read-only reserve lookup, shared by the `GET /reserves/{reserve_pub}`
//! endpoint and the withdraw handler's 409 response (both need the same
//! balance-plus-history view of a reserve).

use crate::amount::Amount;
use crate::store::{ReserveHistoryEntry, Store, StoreError};

#[derive(Debug, Clone)]
pub struct ReserveDetails {
    pub balance: Amount,
    pub history: Vec<ReserveHistoryEntry>,
}

pub enum ReserveLookup {
    Found(ReserveDetails),
    NotFound,
}

/// Fetch a reserve's balance and full history in one shot. A missing
/// reserve is not an error — callers map [`ReserveLookup::NotFound`] to
/// whatever status their transport uses for "no such resource" (404 over
/// HTTP).
pub async fn get_reserve_details(
    store: &dyn Store,
    reserve_pub: &[u8; 32],
) -> Result<ReserveLookup, StoreError> {
    let Some(reserve) = store.get_reserve(reserve_pub).await? else {
        return Ok(ReserveLookup::NotFound);
    };
    let history = store.get_reserve_history(reserve_pub).await?;
    Ok(ReserveLookup::Found(ReserveDetails {
        balance: reserve.balance,
        history,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ClosingRecord, Reserve, WireFee, WirePrepareRecord, WithdrawOutcome, WithdrawRequest};
    use async_trait::async_trait;
    use chrono::Utc;

    struct FakeStore {
        reserve: Option<Reserve>,
    }

    #[async_trait]
    impl Store for FakeStore {
        async fn get_reserve(&self, _: &[u8; 32]) -> Result<Option<Reserve>, StoreError> {
            Ok(self.reserve.clone())
        }
        async fn get_reserve_history(
            &self,
            _: &[u8; 32],
        ) -> Result<Vec<ReserveHistoryEntry>, StoreError> {
            Ok(vec![])
        }
        async fn do_withdraw(
            &self,
            _: &WithdrawRequest,
            _: &[u8],
        ) -> Result<WithdrawOutcome, StoreError> {
            unimplemented!()
        }
        async fn expired_reserves(
            &self,
            _: chrono::DateTime<Utc>,
            _: i64,
        ) -> Result<Vec<Reserve>, StoreError> {
            Ok(vec![])
        }
        async fn commit_closure(
            &self,
            _: &ClosingRecord,
            _: Option<&WirePrepareRecord>,
        ) -> Result<(), StoreError> {
            Ok(())
        }
        async fn get_wire_fee(&self, _: &str, _: chrono::DateTime<Utc>) -> Result<WireFee, StoreError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn returns_not_found_for_unknown_reserve() {
        let store = FakeStore { reserve: None };
        let result = get_reserve_details(&store, &[0u8; 32]).await.unwrap();
        assert!(matches!(result, ReserveLookup::NotFound));
    }

    #[tokio::test]
    async fn returns_balance_and_history_for_known_reserve() {
        let store = FakeStore {
            reserve: Some(Reserve {
                reserve_pub: [1u8; 32],
                balance: Amount::from_parts("EUR", 5, 0).unwrap(),
                expiration_date: Utc::now(),
                sender_account: "payto://iban/DE1".to_string(),
            }),
        };
        let result = get_reserve_details(&store, &[1u8; 32]).await.unwrap();
        match result {
            ReserveLookup::Found(details) => assert_eq!(details.balance.to_string(), "EUR:5"),
            ReserveLookup::NotFound => panic!("expected Found"),
        }
    }
}
