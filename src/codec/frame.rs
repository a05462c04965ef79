//! Frame definitions for the VPN tunnel protocol.
//!
//! # Frame header format (5 bytes)
//! ```text
//! +--------+--------+--------+--------+--------+
//! |  Type  |        Payload Length (4B, BE)    |
//! +--------+--------+--------+--------+--------+
//! ```
//! Confidentiality and integrity of everything on the wire, including this
//! header, are provided by the enclosing TLS stream — there is no
//! application-layer magic number or cipher envelope here.

use serde::{Deserialize, Serialize};
use std::fmt::Display;

pub const HDR_LEN: usize = 5;

/// Frame type tags (spec.md §4.1/§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    AuthRequest = 0x01,
    AuthResponse = 0x02,
    ConfigPush = 0x03,
    KeepAlive = 0x04,
    KeepAliveAck = 0x05,
    Disconnect = 0x06,
    Error = 0x0F,
    DataPacket = 0x10,
}

impl FrameType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0x01 => FrameType::AuthRequest,
            0x02 => FrameType::AuthResponse,
            0x03 => FrameType::ConfigPush,
            0x04 => FrameType::KeepAlive,
            0x05 => FrameType::KeepAliveAck,
            0x06 => FrameType::Disconnect,
            0x0F => FrameType::Error,
            0x10 => FrameType::DataPacket,
            _ => return None,
        })
    }

    pub fn is_control(tag: u8) -> bool {
        tag >= 0x01 && tag <= 0x0F
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
    Macos,
    Windows,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
            Platform::Macos => "macos",
            Platform::Windows => "windows",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequestPayload {
    pub username: String,
    pub password: String,
    #[serde(rename = "clientVersion")]
    pub client_version: String,
    pub platform: Platform,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponsePayload {
    pub success: bool,
    #[serde(rename = "errorMessage", skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(rename = "sessionToken", skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigPushPayload {
    #[serde(rename = "assignedIP")]
    pub assigned_ip: String,
    #[serde(rename = "subnetMask")]
    pub subnet_mask: String,
    pub gateway: String,
    pub dns: Vec<String>,
    pub mtu: u32,
    #[serde(rename = "keepaliveInterval")]
    pub keepalive_interval: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: u32,
    pub message: String,
}

impl ErrorPayload {
    pub const INVALID_CREDENTIALS: u32 = 1001;
    pub const ACCOUNT_DISABLED: u32 = 1002;
    pub const MAX_CONNECTIONS: u32 = 1003;
    pub const IP_POOL_EXHAUSTED: u32 = 1004;
    pub const INTERNAL_ERROR: u32 = 1005;
    pub const SESSION_TIMEOUT: u32 = 1006;
}

/// A raw IPv4 datagram tunneled between client and server.
#[derive(Debug, Clone)]
pub struct DataFrame {
    pub payload: Vec<u8>,
}

impl DataFrame {
    /// Too short to be a valid IPv4 header.
    pub fn invalid(&self) -> bool {
        self.payload.len() < 20
    }

    pub fn version(&self) -> u8 {
        self.payload[0] >> 4
    }

    pub fn dst(&self) -> std::net::Ipv4Addr {
        std::net::Ipv4Addr::new(
            self.payload[16],
            self.payload[17],
            self.payload[18],
            self.payload[19],
        )
    }

    pub fn src(&self) -> std::net::Ipv4Addr {
        std::net::Ipv4Addr::new(
            self.payload[12],
            self.payload[13],
            self.payload[14],
            self.payload[15],
        )
    }
}

/// Protocol frame enum — one variant per [`FrameType`].
#[derive(Debug, Clone)]
pub enum Frame {
    AuthRequest(AuthRequestPayload),
    AuthResponse(AuthResponsePayload),
    ConfigPush(ConfigPushPayload),
    KeepAlive,
    KeepAliveAck,
    Disconnect,
    Error(ErrorPayload),
    Data(DataFrame),
}

impl Frame {
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::AuthRequest(_) => FrameType::AuthRequest,
            Frame::AuthResponse(_) => FrameType::AuthResponse,
            Frame::ConfigPush(_) => FrameType::ConfigPush,
            Frame::KeepAlive => FrameType::KeepAlive,
            Frame::KeepAliveAck => FrameType::KeepAliveAck,
            Frame::Disconnect => FrameType::Disconnect,
            Frame::Error(_) => FrameType::Error,
            Frame::Data(_) => FrameType::DataPacket,
        }
    }
}

impl Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Frame::AuthRequest(p) => write!(f, "auth request from {}", p.username),
            Frame::AuthResponse(p) => write!(f, "auth response success={}", p.success),
            Frame::ConfigPush(p) => write!(f, "config push assignedIP={}", p.assigned_ip),
            Frame::KeepAlive => write!(f, "keepalive"),
            Frame::KeepAliveAck => write!(f, "keepalive ack"),
            Frame::Disconnect => write!(f, "disconnect"),
            Frame::Error(p) => write!(f, "error {}: {}", p.code, p.message),
            Frame::Data(p) => write!(f, "data with payload size {}", p.payload.len()),
        }
    }
}
