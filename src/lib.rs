//! mya-nee: a Discord voice/chat bot and a Telegram clip bot sharing one
//! track library and one download queue.

pub mod config;
pub mod constants;
pub mod download;
pub mod extractor;
pub mod logging;
pub mod parsing;
pub mod playback;
pub mod storage;
pub mod track;
pub mod track_list;

// Discord
pub mod cmd_admin;
pub mod cmd_controls;
pub mod cmd_library;
pub mod definitions;
pub mod voice;

// Telegram
pub mod telegram;
