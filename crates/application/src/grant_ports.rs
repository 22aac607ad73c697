mod audit;
mod candidates;
mod repository;

pub use audit::GrantAuditEvent;
pub use candidates::{expiry_warning_window_end, matches_candidate};
pub use repository::{ExtendGrantInput, GrantRepository, GrantTransition, ReviewFlagInput};
