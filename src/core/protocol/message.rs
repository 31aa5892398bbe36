// src/core/protocol/message.rs

//! Wire-level message definitions: the frame header constants and the
//! `MessageKind` catalog shared by client and server.

use bytes::Bytes;

/// Every frame on the wire starts with this magic word ("IMIM").
pub const MAGIC: u32 = 0x494D_494D;

/// Fixed header size: magic (4) + kind (2) + payload length (4).
pub const HEADER_LEN: usize = 10;

/// All message kinds understood by the server, with their wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageKind {
    LoginRequest = 0x0001,
    LoginResponse = 0x0002,
    RegisterRequest = 0x0003,
    RegisterResponse = 0x0004,
    SendMessage = 0x0005,
    ReceiveMessage = 0x0006,
    Heartbeat = 0x0007,
    HeartbeatResponse = 0x0008,
    UserListRequest = 0x0009,
    UserListResponse = 0x000A,
    Logout = 0x000B,
    Error = 0x000C,

    FriendApplyRequest = 0x0100,
    FriendApplyResponse = 0x0101,
    FriendApplyNotify = 0x0102,
    FriendHandleRequest = 0x0103,
    FriendHandleResponse = 0x0104,
    FriendHandleNotify = 0x0105,
    FriendListRequest = 0x0106,
    FriendListResponse = 0x0107,
    FriendDeleteRequest = 0x0108,
    FriendDeleteResponse = 0x0109,
    FriendBlockRequest = 0x010A,
    FriendBlockResponse = 0x010B,

    GroupCreateRequest = 0x0200,
    GroupCreateResponse = 0x0201,
    GroupListRequest = 0x0202,
    GroupListResponse = 0x0203,
    GroupMemberListRequest = 0x0204,
    GroupMemberListResponse = 0x0205,
    GroupInviteRequest = 0x0206,
    GroupInviteResponse = 0x0207,
    GroupInviteNotify = 0x0208,
    GroupKickRequest = 0x0209,
    GroupKickResponse = 0x020A,
    GroupKickNotify = 0x020B,
    GroupQuitRequest = 0x020C,
    GroupQuitResponse = 0x020D,
    GroupQuitNotify = 0x020E,
    GroupDismissRequest = 0x020F,
    GroupDismissResponse = 0x0210,
    GroupDismissNotify = 0x0211,
    GroupUpdateInfoRequest = 0x0212,
    GroupUpdateInfoResponse = 0x0213,
    GroupUpdateInfoNotify = 0x0214,
}

impl MessageKind {
    /// The u16 code carried in the frame header.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Maps a wire code back to a kind. Returns `None` for codes the server
    /// does not know; the dispatcher logs and skips those frames.
    pub fn from_u16(code: u16) -> Option<Self> {
        use MessageKind::*;
        Some(match code {
            0x0001 => LoginRequest,
            0x0002 => LoginResponse,
            0x0003 => RegisterRequest,
            0x0004 => RegisterResponse,
            0x0005 => SendMessage,
            0x0006 => ReceiveMessage,
            0x0007 => Heartbeat,
            0x0008 => HeartbeatResponse,
            0x0009 => UserListRequest,
            0x000A => UserListResponse,
            0x000B => Logout,
            0x000C => Error,
            0x0100 => FriendApplyRequest,
            0x0101 => FriendApplyResponse,
            0x0102 => FriendApplyNotify,
            0x0103 => FriendHandleRequest,
            0x0104 => FriendHandleResponse,
            0x0105 => FriendHandleNotify,
            0x0106 => FriendListRequest,
            0x0107 => FriendListResponse,
            0x0108 => FriendDeleteRequest,
            0x0109 => FriendDeleteResponse,
            0x010A => FriendBlockRequest,
            0x010B => FriendBlockResponse,
            0x0200 => GroupCreateRequest,
            0x0201 => GroupCreateResponse,
            0x0202 => GroupListRequest,
            0x0203 => GroupListResponse,
            0x0204 => GroupMemberListRequest,
            0x0205 => GroupMemberListResponse,
            0x0206 => GroupInviteRequest,
            0x0207 => GroupInviteResponse,
            0x0208 => GroupInviteNotify,
            0x0209 => GroupKickRequest,
            0x020A => GroupKickResponse,
            0x020B => GroupKickNotify,
            0x020C => GroupQuitRequest,
            0x020D => GroupQuitResponse,
            0x020E => GroupQuitNotify,
            0x020F => GroupDismissRequest,
            0x0210 => GroupDismissResponse,
            0x0211 => GroupDismissNotify,
            0x0212 => GroupUpdateInfoRequest,
            0x0213 => GroupUpdateInfoResponse,
            0x0214 => GroupUpdateInfoNotify,
            _ => return None,
        })
    }

    /// Heartbeat traffic is high-volume noise; callers use this to demote
    /// its log level.
    pub fn is_heartbeat(self) -> bool {
        matches!(self, MessageKind::Heartbeat | MessageKind::HeartbeatResponse)
    }
}

/// One decoded frame: a kind plus its opaque payload (UTF-8 JSON by
/// convention, but the codec does not care).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: MessageKind,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(kind: MessageKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Empty-payload frame (heartbeats, list requests).
    pub fn empty(kind: MessageKind) -> Self {
        Self {
            kind,
            payload: Bytes::new(),
        }
    }
}
