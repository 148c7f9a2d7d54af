/// Name of the Filter Manager communication port.
pub const LOGGER_PORT_NAME: &str = r"\LOGGERPort";

/// Normalized name of the watched file (`C:\Temp\file.txt` on the dev box).
pub const TARGET_FILE_PATH: &str = r"\Device\HarddiskVolume3\Temp\file.txt";

/// Classification carried in every notification.
pub const FILE_ACCESSED: &str = "File accessed";

pub const DEFAULT_REQUEST_COUNT: u32 = 5;
pub const DEFAULT_THREAD_COUNT: u32 = 2;
pub const MAX_THREAD_COUNT: u32 = 64;

/// Append-only log written by the consumer.
pub const DEFAULT_LOG_FILE: &str = "process_log.txt";
