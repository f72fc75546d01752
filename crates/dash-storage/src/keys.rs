//! Storage key names.

/// Keys under which the auth session is persisted.
pub struct StorageKeys;

impl StorageKeys {
    /// Bearer token of the active session.
    pub const AUTH_TOKEN: &'static str = "auth_token";

    /// JSON-serialized user profile of the active session.
    pub const AUTH_USER: &'static str = "auth_user";

    /// All session keys, in the order they are cleared.
    pub const SESSION_KEYS: [&'static str; 2] = [Self::AUTH_TOKEN, Self::AUTH_USER];
}
