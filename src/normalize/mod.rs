pub mod dates;
pub mod pricing;
pub mod status;

pub use dates::parse_vendor_date;
pub use pricing::PeriodUnit;
pub use status::{normalize_status, OrderStatus, StatusTable};
