use core::{fmt, str::FromStr};

/// What the pushed image is meant to replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Application image for the next OTA partition.
    Flash,
    /// Filesystem image for the data partition.
    Filesystem,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Flash => "sketch",
            Self::Filesystem => "filesystem",
        })
    }
}

/// UDP datagram that opens an espota session: `"<command> <port> <size> <md5>\n"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invitation {
    pub command: Command,
    /// TCP port on the sender that serves the image.
    pub port: u16,
    /// Image length in bytes.
    pub size: u32,
    pub md5: [u8; 16],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvitationError {
    NotText,
    Missing(&'static str),
    Malformed(&'static str),
    UnknownCommand(u32),
    TrailingData,
}

impl fmt::Display for InvitationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotText => write!(f, "invitation is not valid UTF-8"),
            Self::Missing(field) => write!(f, "invitation has no {field}"),
            Self::Malformed(field) => write!(f, "invitation has a malformed {field}"),
            Self::UnknownCommand(code) => write!(f, "unknown update command {code}"),
            Self::TrailingData => write!(f, "invitation has unexpected trailing fields"),
        }
    }
}

impl std::error::Error for InvitationError {}

impl Invitation {
    pub fn parse(datagram: &[u8]) -> Result<Self, InvitationError> {
        core::str::from_utf8(datagram).map_err(|_| InvitationError::NotText)?.parse()
    }
}

impl FromStr for Invitation {
    type Err = InvitationError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut fields = text.split_ascii_whitespace();
        let mut next = |name| fields.next().ok_or(InvitationError::Missing(name));

        let command = match next("command")?.parse().map_err(|_| InvitationError::Malformed("command"))? {
            0 => Command::Flash,
            100 => Command::Filesystem,
            code => return Err(InvitationError::UnknownCommand(code)),
        };
        let port = next("port")?.parse().map_err(|_| InvitationError::Malformed("port"))?;
        let size = next("size")?.parse().map_err(|_| InvitationError::Malformed("size"))?;
        let md5 = decode_digest(next("md5")?).ok_or(InvitationError::Malformed("md5"))?;

        if fields.next().is_some() {
            return Err(InvitationError::TrailingData);
        }
        Ok(Self { command, port, size, md5 })
    }
}

fn decode_digest(text: &str) -> Option<[u8; 16]> {
    let mut digest = [0; 16];
    hex::decode_to_slice(text, &mut digest).ok()?;
    Some(digest)
}
