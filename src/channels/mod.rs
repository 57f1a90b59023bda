pub mod cli;
pub mod render;
pub mod telegram;
pub mod telegram_types;
pub mod traits;

pub use cli::CliChannel;
pub use telegram::TelegramChannel;
pub use traits::Channel;
