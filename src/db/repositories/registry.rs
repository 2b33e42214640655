use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{conversion_error, format_datetime, row_datetime},
    models::{
        Appointment, AppointmentStatus, Customer, NewAppointment, NewCustomer, NewService,
        NewVehicle, Vehicle,
    },
};

fn row_to_vehicle(row: &Row) -> Result<Vehicle, rusqlite::Error> {
    Ok(Vehicle {
        id: row.get("id")?,
        license_plate: row.get("license_plate")?,
        brand: row.get("brand")?,
        model: row.get("model")?,
        year: row.get("year")?,
        color: row.get("color")?,
        fuel_type: row.get("fuel_type")?,
        customer_id: row.get("customer_id")?,
    })
}

fn row_to_customer(row: &Row) -> Result<Customer, rusqlite::Error> {
    Ok(Customer {
        id: row.get("id")?,
        full_name: row.get("full_name")?,
        email: row.get("email")?,
        phone: row.get("phone")?,
    })
}

fn row_to_appointment(row: &Row) -> Result<Appointment, rusqlite::Error> {
    let status: String = row.get("status")?;
    Ok(Appointment {
        id: row.get("id")?,
        customer_id: row.get("customer_id")?,
        vehicle_id: row.get("vehicle_id")?,
        service_id: row.get("service_id")?,
        service_name: row.get("service_name")?,
        appointment_date: row_datetime(row, "appointment_date")?,
        estimated_duration: row.get("estimated_duration")?,
        status: AppointmentStatus::parse(&status).map_err(conversion_error)?,
        notes: row.get("notes")?,
    })
}

impl Database {
    /// Exact lookup; callers normalise the plate first.
    pub async fn find_vehicle_by_plate(&self, license_plate: &str) -> Result<Option<Vehicle>> {
        let license_plate = license_plate.to_string();
        self.execute(move |conn| {
            conn.query_row(
                "SELECT id, license_plate, brand, model, year, color, fuel_type, customer_id
                 FROM vehicles
                 WHERE license_plate = ?1",
                params![license_plate],
                row_to_vehicle,
            )
            .optional()
            .context("failed to look up vehicle by plate")
        })
        .await
    }

    pub async fn find_customer(&self, customer_id: i64) -> Result<Option<Customer>> {
        self.execute(move |conn| {
            conn.query_row(
                "SELECT id, full_name, email, phone FROM customers WHERE id = ?1",
                params![customer_id],
                row_to_customer,
            )
            .optional()
            .context("failed to load customer")
        })
        .await
    }

    /// Every appointment of the vehicle, oldest first.
    pub async fn appointments_for_vehicle(&self, vehicle_id: i64) -> Result<Vec<Appointment>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT a.id, a.customer_id, a.vehicle_id, a.service_id, s.name AS service_name,
                        a.appointment_date, a.estimated_duration, a.status, a.notes
                 FROM appointments a
                 LEFT JOIN services s ON s.id = a.service_id
                 WHERE a.vehicle_id = ?1
                 ORDER BY a.appointment_date ASC",
            )?;

            let appointments = stmt
                .query_map(params![vehicle_id], row_to_appointment)?
                .collect::<Result<Vec<_>, _>>()
                .context("failed to load appointments")?;

            Ok(appointments)
        })
        .await
    }

    pub async fn insert_customer(&self, customer: NewCustomer) -> Result<i64> {
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO customers (full_name, email, phone, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    customer.full_name,
                    customer.email,
                    customer.phone,
                    format_datetime(&Utc::now()),
                ],
            )
            .context("failed to insert customer")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn insert_vehicle(&self, vehicle: NewVehicle) -> Result<i64> {
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO vehicles (license_plate, brand, model, year, color, fuel_type, customer_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    vehicle.license_plate,
                    vehicle.brand,
                    vehicle.model,
                    vehicle.year,
                    vehicle.color,
                    vehicle.fuel_type,
                    vehicle.customer_id,
                    format_datetime(&Utc::now()),
                ],
            )
            .context("failed to insert vehicle")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn insert_service(&self, service: NewService) -> Result<i64> {
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO services (name, price, duration_minutes, category, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    service.name,
                    service.price,
                    service.duration_minutes,
                    service.category,
                    format_datetime(&Utc::now()),
                ],
            )
            .context("failed to insert service")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn insert_appointment(&self, appointment: NewAppointment) -> Result<i64> {
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO appointments (
                    customer_id, vehicle_id, service_id, appointment_date,
                    estimated_duration, status, notes, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    appointment.customer_id,
                    appointment.vehicle_id,
                    appointment.service_id,
                    format_datetime(&appointment.appointment_date),
                    appointment.estimated_duration,
                    appointment.status.as_str(),
                    appointment.notes,
                    format_datetime(&Utc::now()),
                ],
            )
            .context("failed to insert appointment")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }
}
