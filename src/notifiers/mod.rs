pub mod format;
pub mod telegram;
pub mod traits;

pub use format::MessageFormatter;
pub use telegram::TelegramMessenger;
pub use traits::{Messenger, ParseMode, SendOutcome};
