//! Chat-platform plumbing: the platform-agnostic callback traits, the
//! inbound dispatch router, and the Telegram driver.

pub mod router;
pub mod telegram;
pub mod traits;

pub use router::{ACCESS_DENIED, BotCommand, Router, SERVER_BUSY, parse_bot_command};
pub use telegram::TelegramChannel;
pub use traits::{CallbackAction, ChatCallbacks, ChatKind, InboundMessage, SendError};
