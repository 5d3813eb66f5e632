//! Message type registry.
//!
//! Codes are a wire contract shared with the gateway. They are partitioned
//! into bands and must never be renumbered:
//!
//! | Band         | Range       |
//! |--------------|-------------|
//! | control      | 0x00..=0x0F |
//! | session data | 0x10..=0x1F |
//! | sub-protocol | 0x20..=0x3F |
//! | responses    | 0x80..=0xFF |

use std::borrow::Cow;
use std::fmt;

/// Known message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum MessageType {
    // =========================================================================
    // Control (0x00 - 0x0F)
    // =========================================================================
    Handshake = 0x00,
    Heartbeat = 0x01,
    Error = 0x02,
    Ping = 0x03,
    Pong = 0x04,
    Connect = 0x05,
    Authenticate = 0x06,
    Disconnect = 0x07,
    ConnectionRegistered = 0x08,
    Connected = 0x09,
    Latency = 0x0A,
    Status = 0x0B,
    Abort = 0x0C,

    // =========================================================================
    // Session data (0x10 - 0x1F)
    // =========================================================================
    SshData = 0x10,
    SshResize = 0x11,
    SshCommand = 0x12,
    SshDataAck = 0x13,

    // =========================================================================
    // Sub-protocol operations (0x20 - 0x3F)
    // =========================================================================
    SftpList = 0x20,
    SftpUpload = 0x21,
    SftpDownload = 0x22,
    SftpMkdir = 0x23,
    SftpDelete = 0x24,
    SftpRename = 0x25,
    SftpChmod = 0x26,
    SftpClose = 0x27,
    SftpCancel = 0x28,

    // =========================================================================
    // Responses (0x80 - 0xFF)
    // =========================================================================
    SftpSuccess = 0x80,
    SftpError = 0x81,
    SftpProgress = 0x82,
    SftpFileData = 0x83,
    SftpFolderData = 0x84,
}

/// Code band a message type belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Band {
    Control,
    Data,
    SubProtocol,
    Response,
    /// 0x40..=0x7F, not assigned.
    Reserved,
}

impl Band {
    /// Classify a raw code.
    pub fn of(code: u8) -> Band {
        match code {
            0x00..=0x0F => Band::Control,
            0x10..=0x1F => Band::Data,
            0x20..=0x3F => Band::SubProtocol,
            0x40..=0x7F => Band::Reserved,
            0x80..=0xFF => Band::Response,
        }
    }
}

impl MessageType {
    /// Every registered type, in code order.
    pub const ALL: [MessageType; 31] = [
        MessageType::Handshake,
        MessageType::Heartbeat,
        MessageType::Error,
        MessageType::Ping,
        MessageType::Pong,
        MessageType::Connect,
        MessageType::Authenticate,
        MessageType::Disconnect,
        MessageType::ConnectionRegistered,
        MessageType::Connected,
        MessageType::Latency,
        MessageType::Status,
        MessageType::Abort,
        MessageType::SshData,
        MessageType::SshResize,
        MessageType::SshCommand,
        MessageType::SshDataAck,
        MessageType::SftpList,
        MessageType::SftpUpload,
        MessageType::SftpDownload,
        MessageType::SftpMkdir,
        MessageType::SftpDelete,
        MessageType::SftpRename,
        MessageType::SftpChmod,
        MessageType::SftpClose,
        MessageType::SftpCancel,
        MessageType::SftpSuccess,
        MessageType::SftpError,
        MessageType::SftpProgress,
        MessageType::SftpFileData,
        MessageType::SftpFolderData,
    ];

    /// Wire code.
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Look up a wire code. Returns `None` for unregistered codes.
    pub fn from_code(code: u8) -> Option<MessageType> {
        let ty = match code {
            0x00 => MessageType::Handshake,
            0x01 => MessageType::Heartbeat,
            0x02 => MessageType::Error,
            0x03 => MessageType::Ping,
            0x04 => MessageType::Pong,
            0x05 => MessageType::Connect,
            0x06 => MessageType::Authenticate,
            0x07 => MessageType::Disconnect,
            0x08 => MessageType::ConnectionRegistered,
            0x09 => MessageType::Connected,
            0x0A => MessageType::Latency,
            0x0B => MessageType::Status,
            0x0C => MessageType::Abort,
            0x10 => MessageType::SshData,
            0x11 => MessageType::SshResize,
            0x12 => MessageType::SshCommand,
            0x13 => MessageType::SshDataAck,
            0x20 => MessageType::SftpList,
            0x21 => MessageType::SftpUpload,
            0x22 => MessageType::SftpDownload,
            0x23 => MessageType::SftpMkdir,
            0x24 => MessageType::SftpDelete,
            0x25 => MessageType::SftpRename,
            0x26 => MessageType::SftpChmod,
            0x27 => MessageType::SftpClose,
            0x28 => MessageType::SftpCancel,
            0x80 => MessageType::SftpSuccess,
            0x81 => MessageType::SftpError,
            0x82 => MessageType::SftpProgress,
            0x83 => MessageType::SftpFileData,
            0x84 => MessageType::SftpFolderData,
            _ => return None,
        };
        Some(ty)
    }

    /// Canonical name as used by the gateway.
    pub const fn name(self) -> &'static str {
        match self {
            MessageType::Handshake => "HANDSHAKE",
            MessageType::Heartbeat => "HEARTBEAT",
            MessageType::Error => "ERROR",
            MessageType::Ping => "PING",
            MessageType::Pong => "PONG",
            MessageType::Connect => "CONNECT",
            MessageType::Authenticate => "AUTHENTICATE",
            MessageType::Disconnect => "DISCONNECT",
            MessageType::ConnectionRegistered => "CONNECTION_REGISTERED",
            MessageType::Connected => "CONNECTED",
            MessageType::Latency => "LATENCY",
            MessageType::Status => "STATUS",
            MessageType::Abort => "ABORT",
            MessageType::SshData => "SSH_DATA",
            MessageType::SshResize => "SSH_RESIZE",
            MessageType::SshCommand => "SSH_COMMAND",
            MessageType::SshDataAck => "SSH_DATA_ACK",
            MessageType::SftpList => "SFTP_LIST",
            MessageType::SftpUpload => "SFTP_UPLOAD",
            MessageType::SftpDownload => "SFTP_DOWNLOAD",
            MessageType::SftpMkdir => "SFTP_MKDIR",
            MessageType::SftpDelete => "SFTP_DELETE",
            MessageType::SftpRename => "SFTP_RENAME",
            MessageType::SftpChmod => "SFTP_CHMOD",
            MessageType::SftpClose => "SFTP_CLOSE",
            MessageType::SftpCancel => "SFTP_CANCEL",
            MessageType::SftpSuccess => "SFTP_SUCCESS",
            MessageType::SftpError => "SFTP_ERROR",
            MessageType::SftpProgress => "SFTP_PROGRESS",
            MessageType::SftpFileData => "SFTP_FILE_DATA",
            MessageType::SftpFolderData => "SFTP_FOLDER_DATA",
        }
    }

    /// Reverse lookup by canonical name.
    pub fn from_name(name: &str) -> Option<MessageType> {
        Self::ALL.iter().copied().find(|ty| ty.name() == name)
    }

    /// Band this type belongs to.
    pub fn band(self) -> Band {
        Band::of(self.code())
    }

    /// Whether this type answers a previously issued request.
    pub fn is_response(self) -> bool {
        self.band() == Band::Response
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<MessageType> for u8 {
    fn from(ty: MessageType) -> u8 {
        ty.code()
    }
}

/// Name for a raw code, `UNKNOWN_<code>` if the code is not registered.
///
/// Unknown codes are surfaced, never rejected; the caller decides whether to
/// ignore, log, or escalate them.
pub fn name_of(code: u8) -> Cow<'static, str> {
    match MessageType::from_code(code) {
        Some(ty) => Cow::Borrowed(ty.name()),
        None => Cow::Owned(format!("UNKNOWN_{}", code)),
    }
}

/// Code for a canonical name.
pub fn code_of(name: &str) -> Option<u8> {
    MessageType::from_name(name).map(MessageType::code)
}
