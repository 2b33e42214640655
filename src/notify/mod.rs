//! Arrival notifications for registered vehicles with an appointment today.

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::{
    db::models::{Appointment, Customer, Vehicle},
    error::NotificationError,
    matching::MatchResult,
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub plate: String,
    pub vehicle: Vehicle,
    pub customer: Customer,
    pub appointments: Vec<Appointment>,
    pub detected_at: DateTime<Local>,
}

impl NotificationEvent {
    /// Human-readable arrival line.
    pub fn message(&self) -> String {
        format!(
            "Vehicle {} arrived: {} {} ({}), owner {}, {} appointment(s) today, detected at {}",
            self.plate,
            self.vehicle.brand,
            self.vehicle.model,
            self.vehicle.year,
            self.customer.full_name,
            self.appointments.len(),
            self.detected_at.format("%Y-%m-%d %H:%M:%S"),
        )
    }
}

pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &'static str;

    fn emit(&self, event: &NotificationEvent) -> Result<(), NotificationError>;
}

/// Writes every arrival to the application log.
pub struct LogSink;

impl NotificationSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn emit(&self, event: &NotificationEvent) -> Result<(), NotificationError> {
        log::info!("{}", event.message());
        Ok(())
    }
}

/// Fans arrivals out to in-process subscribers.
pub struct BroadcastSink {
    sender: broadcast::Sender<NotificationEvent>,
}

impl NotificationSink for BroadcastSink {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    fn emit(&self, event: &NotificationEvent) -> Result<(), NotificationError> {
        self.sender
            .send(event.clone())
            .map(|_| ())
            .map_err(|_| NotificationError::NoSubscribers)
    }
}

pub struct NotificationDispatcher {
    sinks: Vec<Box<dyn NotificationSink>>,
    sender: broadcast::Sender<NotificationEvent>,
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationDispatcher {
    /// Log and broadcast sinks.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            sinks: vec![
                Box::new(LogSink),
                Box::new(BroadcastSink {
                    sender: sender.clone(),
                }),
            ],
            sender,
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.sender.subscribe()
    }

    /// Emits only for a matched vehicle with an owner and at least one
    /// appointment today. Sink failures are logged and never returned.
    pub fn dispatch(
        &self,
        result: &MatchResult,
        plate: &str,
        detected_at: DateTime<Local>,
    ) -> Option<NotificationEvent> {
        let (Some(vehicle), Some(customer)) = (result.vehicle(), result.customer()) else {
            return None;
        };
        if result.appointments_today().is_empty() {
            return None;
        }

        let event = NotificationEvent {
            plate: plate.to_string(),
            vehicle: vehicle.clone(),
            customer: customer.clone(),
            appointments: result.appointments_today().to_vec(),
            detected_at,
        };

        for sink in &self.sinks {
            match sink.emit(&event) {
                Ok(()) => {}
                Err(NotificationError::NoSubscribers) => {
                    log_debug!("No subscriber for arrival of {}", event.plate);
                }
                Err(err) => log_warn!("{err}"),
            }
        }

        log_info!(
            "Arrival notification dispatched for {} ({} sink(s))",
            event.plate,
            self.sinks.len()
        );
        Some(event)
    }
}
