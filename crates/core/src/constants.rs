//! Constants used throughout the referral core crate.
//!
//! Route paths, timeouts and environment variable names live here so the route table, the
//! session layer and the binaries agree on them.

use std::time::Duration;

/// Client-side inactivity window after which the session is signed out.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default buffer size for the in-process event fan-out.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Environment variable that selects the deployment environment.
pub const ENV_FLAG: &str = "REFERRAL_ENV";

/// Optional override for the REST API base URL.
pub const API_URL_OVERRIDE: &str = "REFERRAL_API_URL";

/// Optional override for the event channel base URL.
pub const EVENTS_URL_OVERRIDE: &str = "REFERRAL_EVENTS_URL";

/// Login route for web sessions.
pub const WEB_LOGIN_ROUTE: &str = "/login";

/// Login route for tablet sessions.
pub const TABLET_LOGIN_ROUTE: &str = "/tablet/login";

/// Landing route for authenticated tablet sessions.
pub const TABLET_HOME_ROUTE: &str = "/tablet/home";

/// Prefix shared by every tablet route.
pub const TABLET_NAMESPACE: &str = "/tablet";

/// Routes only reachable while signed out of the web portal.
pub const WEB_AUTH_ROUTES: &[&str] = &["/login", "/signup", "/forgot-password", "/reset-password"];

/// Routes only reachable while signed out of the tablet flow.
pub const TABLET_AUTH_ROUTES: &[&str] = &["/tablet/login"];

/// Header carrying the refresh credential on REST and event-channel requests.
pub const AUTHORIZATION_HEADER: &str = "authorization";
