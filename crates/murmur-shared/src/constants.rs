/// Application name
pub const APP_NAME: &str = "Murmur";

/// Realtime event carrying the online-peer snapshot
pub const EVENT_PRESENCE_SNAPSHOT: &str = "getOnlineUsers";

/// Realtime event carrying a new message
pub const EVENT_MESSAGE_INBOUND: &str = "newMessage";

/// Query parameter that binds a channel to a user
pub const CHANNEL_USER_PARAM: &str = "userId";

/// Header carrying the bearer credential on REST calls
pub const TOKEN_HEADER: &str = "token";

/// Default REST base URL
pub const DEFAULT_API_URL: &str = "http://localhost:5000";

/// Realtime channel endpoint matching [`DEFAULT_API_URL`]
pub const DEFAULT_WS_URL: &str = "ws://localhost:5000/ws";

/// Default timeout for validation, history and send calls
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Reconnect backoff: first delay
pub const DEFAULT_RECONNECT_BASE_MS: u64 = 500;

/// Reconnect backoff: ceiling for a single delay
pub const DEFAULT_RECONNECT_MAX_MS: u64 = 30_000;

/// Reconnect attempts before the session is considered to need re-auth
pub const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 8;

/// Maximum inline image size in bytes (5 MiB)
pub const MAX_IMAGE_SIZE: usize = 5 * 1024 * 1024;
