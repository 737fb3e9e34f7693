//! Shared protocol constants for the ferry wire exchange

// Defaults used when neither the config file nor the command line says otherwise
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 4121;
pub const DEFAULT_BUFFER_SIZE: usize = 1024;
pub const SERVER_DIR: &str = "server";
pub const CLIENT_DIR: &str = "client";

/// Leading character of every command token
pub const COMMAND_SENTINEL: char = '.';

/// Single byte meaning "proceed to the next step"
pub const SYNC_ACK: u8 = b'1';

/// Size/count value meaning "no such file"
pub const NOT_FOUND: i64 = -1;

/// Remove-operation status replies
pub const STATUS_OK: i64 = 1;
pub const STATUS_FAILED: i64 = -1;

// Remove confirmation bytes sent by the client
pub mod confirm {
    pub const YES: u8 = b'Y';
    pub const NO: u8 = b'N';
}

// Frame widths (bytes)
pub mod width {
    pub const NAME_LEN: usize = 2;
    pub const SIZE: usize = 4;
    pub const ELAPSED: usize = 4;
}

// Client waits this long for the server's goodbye ack before closing anyway
pub const DISCONNECT_WAIT_MS: u64 = 2000;

/// Commands understood by the shell. `Connect` never goes over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Upload,
    Download,
    List,
    Remove,
    Disconnect,
    Exit,
}

impl Command {
    pub const ALL: [Command; 7] = [
        Command::Connect,
        Command::Upload,
        Command::Download,
        Command::List,
        Command::Remove,
        Command::Disconnect,
        Command::Exit,
    ];

    pub fn token(self) -> &'static str {
        match self {
            Command::Connect => ".$",
            Command::Upload => ".+",
            Command::Download => ".dl",
            Command::List => "...",
            Command::Remove => ".-",
            Command::Disconnect => ".!",
            Command::Exit => ".x",
        }
    }

    /// Case-insensitive lookup, the way the shell accepts input
    pub fn from_token(token: &str) -> Option<Command> {
        let lower = token.to_ascii_lowercase();
        Command::ALL.into_iter().find(|c| c.token() == lower)
    }

    /// Progressive form used in log lines ("uploading", ...)
    pub fn label(self) -> &'static str {
        match self {
            Command::Connect => "connecting",
            Command::Upload => "uploading",
            Command::Download => "downloading",
            Command::List => "listing",
            Command::Remove => "removing",
            Command::Disconnect => "disconnecting",
            Command::Exit => "exiting",
        }
    }

    /// Whether the command takes a file name argument in the shell
    pub fn takes_file(self) -> bool {
        matches!(self, Command::Upload | Command::Download | Command::Remove)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_unique_and_sentinel_prefixed() {
        for (i, a) in Command::ALL.iter().enumerate() {
            assert!(a.token().starts_with(COMMAND_SENTINEL));
            for b in &Command::ALL[i + 1..] {
                assert_ne!(a.token(), b.token());
            }
        }
    }

    #[test]
    fn lookup_ignores_case() {
        assert_eq!(Command::from_token(".DL"), Some(Command::Download));
        assert_eq!(Command::from_token("..."), Some(Command::List));
        assert_eq!(Command::from_token(".q"), None);
    }
}
