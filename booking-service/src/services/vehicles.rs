//! Read/write contract over the vehicle catalog.
//!
//! The catalog itself is owned elsewhere; bookings only read the owner and
//! hourly price and flip the `available` flag.

use async_trait::async_trait;
use mongodb::bson::doc;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::models::Vehicle;
use crate::services::database::MongoDb;
use crate::services::error::StoreError;

#[async_trait]
pub trait VehicleDirectory: Send + Sync {
    async fn get(&self, vehicle_id: &str) -> Result<Option<Vehicle>, StoreError>;

    async fn set_available(&self, vehicle_id: &str, available: bool) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct MongoVehicleDirectory {
    db: MongoDb,
}

impl MongoVehicleDirectory {
    pub fn new(db: MongoDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl VehicleDirectory for MongoVehicleDirectory {
    async fn get(&self, vehicle_id: &str) -> Result<Option<Vehicle>, StoreError> {
        Ok(self
            .db
            .vehicles()
            .find_one(doc! { "_id": vehicle_id }, None)
            .await?)
    }

    async fn set_available(&self, vehicle_id: &str, available: bool) -> Result<(), StoreError> {
        let result = self
            .db
            .vehicles()
            .update_one(
                doc! { "_id": vehicle_id },
                doc! { "$set": { "available": available } },
                None,
            )
            .await?;
        if result.matched_count == 0 {
            return Err(StoreError::Missing(format!("vehicle {}", vehicle_id)));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryVehicleDirectory {
    vehicles: Mutex<HashMap<String, Vehicle>>,
}

impl InMemoryVehicleDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, vehicle: Vehicle) {
        self.vehicles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(vehicle.id.clone(), vehicle);
    }

    pub fn is_available(&self, vehicle_id: &str) -> Option<bool> {
        self.vehicles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(vehicle_id)
            .map(|v| v.available)
    }
}

#[async_trait]
impl VehicleDirectory for InMemoryVehicleDirectory {
    async fn get(&self, vehicle_id: &str) -> Result<Option<Vehicle>, StoreError> {
        Ok(self
            .vehicles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(vehicle_id)
            .cloned())
    }

    async fn set_available(&self, vehicle_id: &str, available: bool) -> Result<(), StoreError> {
        let mut vehicles = self.vehicles.lock().unwrap_or_else(|e| e.into_inner());
        let vehicle = vehicles
            .get_mut(vehicle_id)
            .ok_or_else(|| StoreError::Missing(format!("vehicle {}", vehicle_id)))?;
        vehicle.available = available;
        Ok(())
    }
}
