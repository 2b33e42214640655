//! Resolves a plate to its vehicle, owner and same-day appointments.

use std::path::PathBuf;

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::Serialize;
use serde_json::json;

use crate::{
    db::{
        models::{Appointment, Customer, NewDetection, Vehicle},
        Database,
    },
    error::PersistenceError,
    plate::clean,
};

/// Outcome of a registry lookup. Without a vehicle there is never a customer
/// or an appointment.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    vehicle: Option<Vehicle>,
    customer: Option<Customer>,
    appointments_today: Vec<Appointment>,
}

impl MatchResult {
    pub fn unmatched() -> Self {
        Self::default()
    }

    pub fn found(
        vehicle: Vehicle,
        customer: Option<Customer>,
        appointments_today: Vec<Appointment>,
    ) -> Self {
        Self {
            vehicle: Some(vehicle),
            customer,
            appointments_today,
        }
    }

    pub fn vehicle(&self) -> Option<&Vehicle> {
        self.vehicle.as_ref()
    }

    pub fn customer(&self) -> Option<&Customer> {
        self.customer.as_ref()
    }

    pub fn appointments_today(&self) -> &[Appointment] {
        &self.appointments_today
    }

    pub fn is_match(&self) -> bool {
        self.vehicle.is_some()
    }

    /// Audit row for this outcome; `detection_data` snapshots the match.
    pub fn to_detection(
        &self,
        plate: &str,
        confidence: f32,
        image_path: Option<PathBuf>,
        is_automatic: bool,
        detected_at: DateTime<Local>,
    ) -> NewDetection {
        NewDetection {
            license_plate: plate.to_string(),
            confidence: f64::from(confidence),
            image_path,
            vehicle_id: self.vehicle.as_ref().map(|vehicle| vehicle.id),
            is_automatic,
            detection_data: json!({
                "plate": plate,
                "vehicleFound": self.is_match(),
                "match": self,
            }),
            detected_at: detected_at.with_timezone(&Utc),
        }
    }
}

#[derive(Clone)]
pub struct MatchEngine {
    db: Database,
}

impl MatchEngine {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Matches against the registry using the local calendar day.
    pub async fn match_plate(&self, plate: &str) -> Result<MatchResult, PersistenceError> {
        self.match_plate_on(plate, Local::now().date_naive()).await
    }

    /// Exact lookup of the normalised plate. No fuzzy matching: a single
    /// misread character yields an unmatched result.
    pub async fn match_plate_on(
        &self,
        plate: &str,
        day: NaiveDate,
    ) -> Result<MatchResult, PersistenceError> {
        let plate = clean(plate);
        if plate.is_empty() {
            return Ok(MatchResult::unmatched());
        }

        let Some(vehicle) = self.db.find_vehicle_by_plate(&plate).await? else {
            return Ok(MatchResult::unmatched());
        };

        let customer = match vehicle.customer_id {
            Some(customer_id) => self.db.find_customer(customer_id).await?,
            None => None,
        };

        let appointments_today = self
            .db
            .appointments_for_vehicle(vehicle.id)
            .await?
            .into_iter()
            .filter(|appointment| {
                appointment.appointment_date.with_timezone(&Local).date_naive() == day
            })
            .collect();

        Ok(MatchResult::found(vehicle, customer, appointments_today))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};

    use crate::db::{
        models::{AppointmentStatus, NewAppointment, NewCustomer, NewService, NewVehicle},
        Database,
    };

    pub struct Seeded {
        pub customer_id: i64,
        pub vehicle_id: i64,
    }

    /// Local 10:00 on `day`, in UTC.
    pub fn at_ten(day: NaiveDate) -> DateTime<Utc> {
        Local
            .from_local_datetime(&day.and_hms_opt(10, 0, 0).unwrap())
            .earliest()
            .unwrap()
            .with_timezone(&Utc)
    }

    /// Registers `plate` with an owner and one appointment per entry of `days`.
    pub async fn seed_vehicle(db: &Database, plate: &str, days: &[NaiveDate]) -> Seeded {
        let customer_id = db
            .insert_customer(NewCustomer {
                full_name: "Giulia Bianchi".into(),
                email: "giulia@example.com".into(),
                phone: "+39 347 1234567".into(),
            })
            .await
            .unwrap();
        let vehicle_id = db
            .insert_vehicle(NewVehicle {
                license_plate: plate.into(),
                brand: "Alfa Romeo".into(),
                model: "Giulietta".into(),
                year: 2018,
                color: "grey".into(),
                fuel_type: Some("diesel".into()),
                customer_id: Some(customer_id),
            })
            .await
            .unwrap();
        let service_id = db
            .insert_service(NewService {
                name: "Cambio olio".into(),
                price: 80.0,
                duration_minutes: 45,
                category: "maintenance".into(),
            })
            .await
            .unwrap();

        for day in days {
            db.insert_appointment(NewAppointment {
                customer_id,
                vehicle_id,
                service_id,
                appointment_date: at_ten(*day),
                estimated_duration: 45,
                status: AppointmentStatus::Scheduled,
                notes: None,
            })
            .await
            .unwrap();
        }

        Seeded {
            customer_id,
            vehicle_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::testing::*;
    use super::*;
    use crate::db::{models::NewVehicle, testing::temp_database};

    #[tokio::test]
    async fn returns_only_todays_appointments() {
        let (db, _dir) = temp_database();
        let today = NaiveDate::from_ymd_opt(2026, 6, 15).unwrap();
        let seeded = seed_vehicle(
            &db,
            "AB123CD",
            &[today - Duration::days(1), today, today, today + Duration::days(1)],
        )
        .await;

        let result = MatchEngine::new(db)
            .match_plate_on("AB123CD", today)
            .await
            .unwrap();

        assert_eq!(result.vehicle().unwrap().id, seeded.vehicle_id);
        assert_eq!(result.customer().unwrap().id, seeded.customer_id);
        assert_eq!(result.appointments_today().len(), 2);
        assert!(result
            .appointments_today()
            .iter()
            .all(|a| a.appointment_date.with_timezone(&Local).date_naive() == today));
    }

    #[tokio::test]
    async fn plate_is_normalised_before_lookup() {
        let (db, _dir) = temp_database();
        let today = NaiveDate::from_ymd_opt(2026, 6, 15).unwrap();
        seed_vehicle(&db, "AB123CD", &[today]).await;

        let result = MatchEngine::new(db)
            .match_plate_on(" ab-123 cd ", today)
            .await
            .unwrap();
        assert!(result.is_match());
    }

    #[tokio::test]
    async fn one_character_off_is_unmatched() {
        let (db, _dir) = temp_database();
        let today = NaiveDate::from_ymd_opt(2026, 6, 15).unwrap();
        seed_vehicle(&db, "AB123CD", &[today]).await;

        let result = MatchEngine::new(db)
            .match_plate_on("AB123CO", today)
            .await
            .unwrap();
        assert_eq!(result, MatchResult::unmatched());
        assert!(result.customer().is_none());
        assert!(result.appointments_today().is_empty());
    }

    #[tokio::test]
    async fn unmatched_detection_row_is_unprocessed() {
        let (db, _dir) = temp_database();
        let result = MatchEngine::new(db.clone())
            .match_plate("AB123CD")
            .await
            .unwrap();

        let row = result.to_detection("AB123CD", 0.7, None, true, Local::now());
        assert_eq!(row.vehicle_id, None);
        db.insert_detection(row).await.unwrap();

        let stored = db.unprocessed_detections().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert!(!stored[0].processed);
        assert_eq!(stored[0].vehicle_id, None);
        assert_eq!(
            stored[0].detection_data.as_ref().unwrap()["vehicleFound"],
            serde_json::Value::Bool(false)
        );
    }

    #[tokio::test]
    async fn vehicle_without_owner_has_no_customer() {
        let (db, _dir) = temp_database();
        db.insert_vehicle(NewVehicle {
            license_plate: "CD456EF".into(),
            brand: "Lancia".into(),
            model: "Ypsilon".into(),
            year: 2021,
            color: "blue".into(),
            fuel_type: None,
            customer_id: None,
        })
        .await
        .unwrap();

        let result = MatchEngine::new(db).match_plate("CD456EF").await.unwrap();
        assert!(result.is_match());
        assert!(result.customer().is_none());
        assert!(result.appointments_today().is_empty());
    }
}
