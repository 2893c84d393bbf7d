use mongodb::{
    bson::{doc, Document},
    options::IndexOptions,
    Client as MongoClient, Collection, Database, IndexModel,
};

use crate::models::{Booking, Transaction, Vehicle};
use crate::services::error::StoreError;

#[derive(Clone)]
pub struct MongoDb {
    client: MongoClient,
    db: Database,
}

impl MongoDb {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, StoreError> {
        tracing::info!(database = %database, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to MongoDB");
            StoreError::from(e)
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub async fn initialize_indexes(&self) -> Result<(), StoreError> {
        tracing::info!("Creating MongoDB indexes for booking-service");

        let bookings = self.bookings();
        for (keys, name) in [
            (
                doc! { "vehicle_id": 1, "status": 1, "start": 1, "end": 1 },
                "vehicle_window_lookup",
            ),
            (doc! { "renter_id": 1, "created_at": -1 }, "renter_lookup"),
            (doc! { "status": 1, "end": 1 }, "status_end_sweep"),
        ] {
            bookings
                .create_index(named_index(keys, name, false), None)
                .await?;
            tracing::info!(index = name, "Created index on bookings");
        }

        let transactions = self.transactions();
        for (keys, name, unique) in [
            (
                doc! { "provider": 1, "provider_id": 1 },
                "provider_reference",
                true,
            ),
            (doc! { "status": 1, "created_at": 1 }, "status_age_sweep", false),
            (doc! { "booking_id": 1 }, "booking_lookup", false),
        ] {
            transactions
                .create_index(named_index(keys, name, unique), None)
                .await?;
            tracing::info!(index = name, "Created index on transactions");
        }

        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), StoreError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "MongoDB health check failed");
                StoreError::from(e)
            })?;
        Ok(())
    }

    pub fn bookings(&self) -> Collection<Booking> {
        self.db.collection("bookings")
    }

    pub fn transactions(&self) -> Collection<Transaction> {
        self.db.collection("transactions")
    }

    pub fn vehicles(&self) -> Collection<Vehicle> {
        self.db.collection("vehicles")
    }

    /// One document per vehicle, bumped inside every booking insert so that
    /// concurrent inserts for the same vehicle write-conflict.
    pub fn booking_guards(&self) -> Collection<Document> {
        self.db.collection("vehicle_booking_guards")
    }

    pub fn client(&self) -> &MongoClient {
        &self.client
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

fn named_index(keys: Document, name: &str, unique: bool) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(
            IndexOptions::builder()
                .name(name.to_string())
                .unique(unique)
                .build(),
        )
        .build()
}
