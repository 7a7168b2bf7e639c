//! Entity services and the scan dispatcher.
//!
//! The services are the authorization boundary: every operation takes the
//! request context, consults the oracle, and only then touches the store.
//! Cache decorators sit strictly between the services and the primary
//! store, so nothing they do can bypass validation or authorization.
//!
//! [`scan::ScanDispatcher`] is the fan-out engine: profile resolution,
//! one concurrent task per check, partial-failure aggregation.

pub mod cache;
pub mod checks;
pub mod page;
pub mod profiles;
pub mod scan;
pub mod users;

pub use cache::{CacheOptions, CheckStoreCache, ProfileStoreCache, UserStoreCache};
pub use checks::{CheckService, CreateCheckInput, UpdateCheckInput};
pub use page::Page;
pub use profiles::{CreateProfileInput, ProfileService, UpdateProfileInput};
pub use scan::{CheckOutcome, ScanDispatcher, ScanOutcome, ScanPayload};
pub use users::{CreateUserInput, CreatedUser, UpdateUserInput, UserService};

/// The system-wide fallback profile. It always exists; deleting it is
/// refused.
pub const DEFAULT_PROFILE_NAME: &str = "default";

/// `services.*.pageSize` lower bound and default.
pub const MIN_PAGE_SIZE: usize = 2;
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Construction-time check shared by the three services.
pub(crate) fn validate_page_size(page_size: usize) -> Result<(), soph_core::Error> {
    if page_size < MIN_PAGE_SIZE {
        let mut report = soph_core::ValidationReport::default();
        report.push("page_size", format!("must be at least {MIN_PAGE_SIZE}"));
        return Err(soph_core::Error::validation(report));
    }
    Ok(())
}
