// Protocol constants for the Whatsminer API

use std::time::Duration;

/// TCP port the btminer API listens on
pub const DEFAULT_PORT: u16 = 4028;

/// AES block size; encrypted payloads are always a multiple of this
pub const BLOCK_SIZE: usize = 16;

/// Magic prefix of MD5-crypt output
pub const MD5_CRYPT_MAGIC: &str = "$1$";

/// MD5-crypt only uses the first 8 characters of the salt
pub const MD5_CRYPT_SALT_MAX: usize = 8;

/// Default deadline for establishing a TCP connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default deadline for a single read while waiting for the miner to close
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Initial capacity of the receive buffer
pub const READ_BUFFER_SIZE: usize = 4096;

/// Fields requested by `get_miner_info` when the caller does not pick any
pub const DEFAULT_MINER_INFO_FIELDS: &str = "ip,proto,netmask,gateway,dns,hostname,mac,ledstat";

/// Extension given to downloaded log archives
pub const DEFAULT_LOG_EXTENSION: &str = "tar.gz";
