pub mod chat;
pub mod envelope;
pub mod frames;
pub mod ip;

pub use chat::{
    AnnouncementQuery, BanClientRequest, BanClientResponse, BroadcastRequest, BroadcastTarget,
    ChatMessage, ChatSettings, KickRequest, MAX_PAGE_SIZE, MessagePriority, MessageStatus,
    NewChatMessage, OnlineInfo, Page, PageQuery, UserInfo,
};
pub use envelope::{ApiEnvelope, SUCCESS_MESSAGE};
pub use frames::{ClientFrame, FramePayload, KickNotice, ServerFrame, SystemPayload};
pub use ip::{
    BanKind, CleanExpiredResponse, CreateIpAllowRequest, CreateIpBanRequest, IpAllow,
    IpAllowCheck, IpBan, IpBanCheck, IpQuery, NewIpAllow, NewIpBan,
};
