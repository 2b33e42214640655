pub mod detection;
pub mod registry;

pub use detection::{DetectionRecord, DetectionStatistics, NewDetection};
pub use registry::{
    Appointment, AppointmentStatus, Customer, NewAppointment, NewCustomer, NewService,
    NewVehicle, Vehicle,
};
