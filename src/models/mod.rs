pub mod family;
pub mod photo;
pub mod request;

pub use family::{Family, SubscriptionTier};
pub use photo::{Photo, PhotoStatus};
pub use request::{PhotoRequest, RequestStatus, Role};
