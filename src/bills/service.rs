use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::{LedgerError, Result, StoreError, StoreResult};
use crate::money::Money;
use crate::types::{BillId, BillType, UserId};

use super::{Bill, BillFilter, BillStore, NewBill, UserBillShare};

/// scanned bill attached at creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillImage {
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// blob storage for bill images
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put(&self, key: &str, image: BillImage) -> StoreResult<()>;
    async fn get(&self, key: &str) -> StoreResult<BillImage>;
    async fn delete(&self, key: &str) -> StoreResult<()>;
}

#[derive(Debug, Default)]
pub struct MemoryObjectStorage {
    objects: Mutex<HashMap<String, BillImage>>,
}

impl MemoryObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn put(&self, key: &str, image: BillImage) -> StoreResult<()> {
        self.objects.lock().insert(key.to_string(), image);
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<BillImage> {
        self.objects
            .lock()
            .get(key)
            .cloned()
            .ok_or(StoreError::NotFound { entity: "image" })
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.objects
            .lock()
            .remove(key)
            .map(|_| ())
            .ok_or(StoreError::NotFound { entity: "image" })
    }
}

/// bill management on top of a `BillStore` and an image store
pub struct BillService {
    store: Arc<dyn BillStore>,
    objects: Arc<dyn ObjectStorage>,
}

impl BillService {
    pub fn new(store: Arc<dyn BillStore>, objects: Arc<dyn ObjectStorage>) -> Self {
        Self { store, objects }
    }

    /// parse a bill type as received from a client
    pub fn parse_bill_type(raw: &str) -> Result<BillType> {
        Ok(raw.parse::<BillType>()?)
    }

    /// store the image (if any) and then the bill
    ///
    /// If the bill insert fails the uploaded image is removed again.
    #[tracing::instrument(skip_all, fields(apartment_id = %bill.apartment_id, bill_number = bill.bill_number))]
    pub async fn add_bill(&self, mut bill: NewBill, image: Option<BillImage>) -> Result<Bill> {
        bill.validate()?;

        let image_key = match image {
            Some(image) => {
                let key = format!("bills/{}/{}", bill.apartment_id, Uuid::new_v4());
                self.objects.put(&key, image).await.map_err(LedgerError::Storage)?;
                bill.image_key = Some(key.clone());
                Some(key)
            }
            None => None,
        };

        match self.store.create(bill).await {
            Ok(bill) => {
                info!(bill_id = %bill.id, amount = %bill.amount, "bill created");
                Ok(bill)
            }
            Err(err) => {
                if let Some(key) = image_key {
                    if let Err(cleanup) = self.objects.delete(&key).await {
                        warn!(key = %key, error = %cleanup, "failed to remove orphaned bill image");
                    }
                }
                Err(err.into())
            }
        }
    }

    /// a bill and its image; a missing image is tolerated
    pub async fn get_bill(&self, filter: &BillFilter) -> Result<(Bill, Option<BillImage>)> {
        if filter.is_empty() {
            return Err(LedgerError::invalid_bill("filter must set at least one field"));
        }
        let bill = self.store.read(filter).await?;

        let image = match &bill.image_key {
            Some(key) => match self.objects.get(key).await {
                Ok(image) => Some(image),
                Err(err) => {
                    warn!(bill_id = %bill.id, key = %key, error = %err, "bill image unavailable");
                    None
                }
            },
            None => None,
        };
        Ok((bill, image))
    }

    pub async fn delete_bill(&self, bill_id: BillId) -> Result<()> {
        self.store.soft_delete(bill_id).await?;
        debug!(bill_id = %bill_id, "bill soft-deleted");
        Ok(())
    }

    /// the user's position on each of their bills; `BillNotFound` if none
    pub async fn user_bill_shares(&self, user_id: UserId) -> Result<Vec<UserBillShare>> {
        let shares = self.store.user_bill_shares(user_id).await?;
        if shares.is_empty() {
            return Err(LedgerError::BillNotFound);
        }
        Ok(shares)
    }

    pub async fn user_total_debt(&self, user_id: UserId) -> Result<Money> {
        Ok(self.store.user_total_debt(user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bills::RemainderPolicy;
    use crate::errors::ErrorKind;
    use crate::membership::MembershipSource;
    use crate::storage::MemoryStore;
    use chrono::{Duration, NaiveDate, TimeZone, Utc};
    use hourglass_rs::{SafeTimeProvider, TimeSource};

    struct Fixture {
        store: Arc<MemoryStore>,
        objects: Arc<MemoryObjectStorage>,
        service: BillService,
    }

    fn fixture() -> Fixture {
        let time = Arc::new(SafeTimeProvider::new(TimeSource::Test(
            Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
        )));
        let store = Arc::new(MemoryStore::with_settings(
            time,
            Duration::minutes(30),
            RemainderPolicy::EarliestMembers,
        ));
        let objects = Arc::new(MemoryObjectStorage::new());
        let service = BillService::new(store.clone(), objects.clone());
        Fixture {
            store,
            objects,
            service,
        }
    }

    fn new_bill(apartment_id: Uuid, number: i64) -> NewBill {
        NewBill {
            name: "march gas".to_string(),
            bill_type: BillType::Gas,
            bill_number: number,
            amount: Money::from_minor(300),
            due_date: NaiveDate::from_ymd_opt(2025, 3, 31).unwrap(),
            apartment_id,
            image_key: None,
        }
    }

    fn image() -> BillImage {
        BillImage {
            content_type: Some("image/png".to_string()),
            bytes: vec![0x89, 0x50, 0x4e, 0x47],
        }
    }

    #[tokio::test]
    async fn test_add_and_get_with_image() {
        let fx = fixture();
        let apartment_id = Uuid::new_v4();

        let bill = fx.service.add_bill(new_bill(apartment_id, 1), Some(image())).await.unwrap();
        assert!(bill.image_key.is_some());
        assert_eq!(fx.objects.len(), 1);

        let (found, img) = fx.service.get_bill(&BillFilter::by_id(bill.id)).await.unwrap();
        assert_eq!(found, bill);
        assert_eq!(img, Some(image()));
    }

    #[tokio::test]
    async fn test_failed_insert_removes_image() {
        let fx = fixture();
        let apartment_id = Uuid::new_v4();
        fx.service.add_bill(new_bill(apartment_id, 1), None).await.unwrap();

        let err = fx
            .service
            .add_bill(new_bill(apartment_id, 1), Some(image()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert!(fx.objects.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_bill_uploads_nothing() {
        let fx = fixture();
        let mut bill = new_bill(Uuid::new_v4(), 1);
        bill.amount = Money::from_minor(-5);

        let err = fx.service.add_bill(bill, Some(image())).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidBill);
        assert!(fx.objects.is_empty());
    }

    #[tokio::test]
    async fn test_missing_image_is_tolerated() {
        let fx = fixture();
        let bill = fx.service.add_bill(new_bill(Uuid::new_v4(), 1), Some(image())).await.unwrap();
        let key = bill.image_key.clone().unwrap();
        fx.objects.delete(&key).await.unwrap();

        let (found, img) = fx.service.get_bill(&BillFilter::by_id(bill.id)).await.unwrap();
        assert_eq!(found.id, bill.id);
        assert!(img.is_none());
    }

    #[tokio::test]
    async fn test_lookup_errors() {
        let fx = fixture();

        let err = fx.service.get_bill(&BillFilter::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidBill);

        let err = fx.service.get_bill(&BillFilter::by_id(Uuid::new_v4())).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BillNotFound);

        let err = BillService::parse_bill_type("internet").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidBill);
        assert_eq!(BillService::parse_bill_type("water").unwrap(), BillType::Water);
    }

    #[tokio::test]
    async fn test_user_views() {
        let fx = fixture();
        let apartment_id = Uuid::new_v4();
        let user = Uuid::new_v4();

        let err = fx.service.user_bill_shares(user).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BillNotFound);
        assert_eq!(fx.service.user_total_debt(user).await.unwrap(), Money::ZERO);

        fx.store
            .add_member(user, apartment_id, Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap())
            .await
            .unwrap();
        fx.store
            .add_member(Uuid::new_v4(), apartment_id, Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap())
            .await
            .unwrap();
        let bill = fx.service.add_bill(new_bill(apartment_id, 9), None).await.unwrap();

        let shares = fx.service.user_bill_shares(user).await.unwrap();
        assert_eq!(shares.len(), 1);
        assert_eq!(shares[0].share_per_user, Money::from_minor(150));
        assert_eq!(fx.service.user_total_debt(user).await.unwrap(), Money::from_minor(150));

        fx.service.delete_bill(bill.id).await.unwrap();
        assert_eq!(fx.service.user_total_debt(user).await.unwrap(), Money::ZERO);
        assert_eq!(
            fx.service.delete_bill(bill.id).await.unwrap_err().kind(),
            ErrorKind::BillNotFound
        );
    }
}
