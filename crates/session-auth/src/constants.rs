//! Defaults for the session endpoints and credential persistence.

/// Login endpoint path, relative to the API base URL
pub const DEFAULT_LOGIN_PATH: &str = "/auth/login";

/// Refresh endpoint path, relative to the API base URL
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";

/// Key the credential is stored under in the credential file
pub const DEFAULT_STORAGE_KEY: &str = "session";

/// Credential file name when none is configured
pub const DEFAULT_STORAGE_FILE: &str = "session.json";

/// Status code the API uses to signal an expired access token
pub const EXPIRED_CREDENTIAL_STATUS: u16 = 401;

/// Upper bound on a single refresh call, in seconds
pub const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 10;
