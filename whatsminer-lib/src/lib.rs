pub mod cipher;
pub mod commands;
pub mod constants;
pub mod crypt;
pub mod device;
pub mod error;
pub mod logs;
pub mod message;
pub mod session;
pub mod transport;

// Re-export the main types for easy access
pub use commands::CommandName;
pub use constants::DEFAULT_PORT;
pub use crypt::{Md5Crypt, SaltedHash};
pub use device::Whatsminer;
pub use error::WMError;
pub use logs::{LogDownload, LogFile};
pub use message::{Command, Response, Status, StatusCode, Token};
pub use session::{PrivilegedSession, SessionState};
pub use transport::ClientConfig;
