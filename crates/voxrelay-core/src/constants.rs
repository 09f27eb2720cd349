//! Names shared with the deployed BPMN process.
//!
//! Changing any of these requires a matching change in the process model.

/// Name of the message published for every inbound voice fragment.
pub const VOICE_INPUT_MESSAGE: &str = "MSG_VOICE";

/// Job type of the service task that carries the bot reply back.
pub const VOICE_RESPONSE_TASK: &str = "provide-voice-response";

/// Message variable holding the transcribed user text.
pub const VAR_USER_INPUT: &str = "userInput";

/// Process variable holding the session id (both directions).
pub const VAR_UNIQUE_ID: &str = "uniqueId";

/// Job variable holding the reply text.
pub const VAR_BOT_REPLY: &str = "botReply";

/// Job completion variable reporting whether the reply reached a client.
pub const VAR_RELAYED: &str = "relayed";

/// Session id used when the caller supplies none.
pub const DEFAULT_SESSION_ID: &str = "default";

/// Message returned to the caller while the engine client is still connecting.
pub const CLIENT_NOT_INITIALIZED: &str = "client not initialized";
