pub mod types;
pub mod validator;

pub use types::{BoundingBox, PlateCandidate, ValidatedDetection};
pub use validator::{clean, is_valid_plate, PlateValidator};
