//! Action tags consulted by the oracle.
//!
//! One tag per public operation. Handlers pass these verbatim; backends
//! match on them.

pub const USERS_GET: &str = "users::get";
pub const USERS_LIST: &str = "users::list";
pub const USERS_CREATE: &str = "users::create";
pub const USERS_UPDATE: &str = "users::update";
pub const USERS_DELETE: &str = "users::delete";
pub const USERS_ROTATE_TOKEN: &str = "users::rotate-token";

pub const PROFILES_GET: &str = "profiles::get";
pub const PROFILES_LIST: &str = "profiles::list";
pub const PROFILES_CREATE: &str = "profiles::create";
pub const PROFILES_UPDATE: &str = "profiles::update";
pub const PROFILES_DELETE: &str = "profiles::delete";

pub const CHECKS_GET: &str = "checks::get";
pub const CHECKS_LIST: &str = "checks::list";
pub const CHECKS_CREATE: &str = "checks::create";
pub const CHECKS_UPDATE: &str = "checks::update";
pub const CHECKS_DELETE: &str = "checks::delete";

pub const SCAN_PERFORM: &str = "scan::perform";
