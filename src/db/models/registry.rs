use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: i64,
    pub full_name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub id: i64,
    pub license_plate: String,
    pub brand: String,
    pub model: String,
    pub year: i32,
    pub color: String,
    pub fuel_type: Option<String>,
    pub customer_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::InProgress => "in_progress",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value {
            "scheduled" => Ok(AppointmentStatus::Scheduled),
            "confirmed" => Ok(AppointmentStatus::Confirmed),
            "in_progress" => Ok(AppointmentStatus::InProgress),
            "completed" => Ok(AppointmentStatus::Completed),
            "cancelled" => Ok(AppointmentStatus::Cancelled),
            other => Err(anyhow::anyhow!("unknown appointment status {other}")),
        }
    }
}

/// An appointment joined with the name of its service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: i64,
    pub customer_id: i64,
    pub vehicle_id: i64,
    pub service_id: i64,
    pub service_name: Option<String>,
    pub appointment_date: DateTime<Utc>,
    pub estimated_duration: i64,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewCustomer {
    pub full_name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone)]
pub struct NewVehicle {
    pub license_plate: String,
    pub brand: String,
    pub model: String,
    pub year: i32,
    pub color: String,
    pub fuel_type: Option<String>,
    pub customer_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewService {
    pub name: String,
    pub price: f64,
    pub duration_minutes: i64,
    pub category: String,
}

#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub customer_id: i64,
    pub vehicle_id: i64,
    pub service_id: i64,
    pub appointment_date: DateTime<Utc>,
    pub estimated_duration: i64,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
}
