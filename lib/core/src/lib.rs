pub mod error;
pub mod types;

pub use error::{ServiceError, ValidationErrors};
pub use types::{millis_to_rfc3339, new_id, now_millis, now_rfc3339, rfc3339_add_millis, rfc3339_to_millis};
