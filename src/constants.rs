// Track persistence
pub const TRACK_LIST_FILE_NAME: &str = "track_list.json";
pub const DATE_TIME_FORMAT:     &str = "%d-%m-%Y_%H:%M"; // day-month-year_hour:minute
pub const DEFAULT_VOLUME:       u32  = 100;

// Radio mode
pub const DEFAULT_COOLDOWN_HOURS: i64 = 24;

// Listings are sent in chunks so a single message never grows too large
pub const LIST_CHUNK_SIZE: usize = 10;

// Data directory layout, relative to the configured data root
pub const IMAGE_DIR_NAME:    &str = "images";
pub const AUDIO_DIR_NAME:    &str = "audio";
pub const DOWNLOAD_DIR_NAME: &str = "downloads";

// Images posted alongside some replies, looked up in the image directory
pub const RADIO_IMAGE:     &str = "mya-nee_approval.png";
pub const INTRUDER_IMAGE:  &str = "hackerman.gif";

// Replies
pub const MSG_UNKNOWN_COMMAND:  &str = "Wakarimasen! >.<'";
pub const MSG_PERMISSION_DENIED: &str = "Uragirimono! >.<'";
pub const MSG_OUT_OF_TRACKS:    &str = "mya-nee ran out of things to play >.<'";
pub const MSG_RADIO:            &str = "besto radio";
pub const MSG_CLIP_FAILED:      &str = "mya-nee could not fetch that clip >.<'";
pub const REACTION_SUCCESS:     char = '💖';

// Downloads
pub const DOWNLOAD_EXTENSION: &str = "mp3";
pub const CLIP_EXTENSION:     &str = "mp4";
