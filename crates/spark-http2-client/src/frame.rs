//! 连接层与会话协作方之间交换的最小帧/元数据模型。
//!
//! 本 crate 不做帧编解码，这里只保留连接层需要“说出口”的部分：
//! 流标识、HTTP/2 错误码、流关闭事件，以及请求/响应的头部元数据。

use std::fmt;

use http::{HeaderMap, Method, StatusCode, Uri, Version};

/// HTTP/2 流标识。客户端发起的流为奇数，升级产生的隐式流固定为 1。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u32);

impl StreamId {
    /// HTTP/1.1 升级后隐式创建的流。
    pub const UPGRADE: StreamId = StreamId(1);

    /// 客户端发起的流使用奇数编号。
    pub const fn is_client_initiated(self) -> bool {
        self.0 % 2 == 1
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// RFC 9113 §7 定义的错误码。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

impl ErrorCode {
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// 未知错误码按 RFC 要求视为 `INTERNAL_ERROR`。
    pub const fn from_code(code: u32) -> ErrorCode {
        match code {
            0x0 => ErrorCode::NoError,
            0x1 => ErrorCode::ProtocolError,
            0x3 => ErrorCode::FlowControlError,
            0x4 => ErrorCode::SettingsTimeout,
            0x5 => ErrorCode::StreamClosed,
            0x6 => ErrorCode::FrameSizeError,
            0x7 => ErrorCode::RefusedStream,
            0x8 => ErrorCode::Cancel,
            0x9 => ErrorCode::CompressionError,
            0xa => ErrorCode::ConnectError,
            0xb => ErrorCode::EnhanceYourCalm,
            0xc => ErrorCode::InadequateSecurity,
            0xd => ErrorCode::Http11Required,
            _ => ErrorCode::InternalError,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::NoError => "NO_ERROR",
            ErrorCode::ProtocolError => "PROTOCOL_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::FlowControlError => "FLOW_CONTROL_ERROR",
            ErrorCode::SettingsTimeout => "SETTINGS_TIMEOUT",
            ErrorCode::StreamClosed => "STREAM_CLOSED",
            ErrorCode::FrameSizeError => "FRAME_SIZE_ERROR",
            ErrorCode::RefusedStream => "REFUSED_STREAM",
            ErrorCode::Cancel => "CANCEL",
            ErrorCode::CompressionError => "COMPRESSION_ERROR",
            ErrorCode::ConnectError => "CONNECT_ERROR",
            ErrorCode::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            ErrorCode::InadequateSecurity => "INADEQUATE_SECURITY",
            ErrorCode::Http11Required => "HTTP_1_1_REQUIRED",
        };
        f.write_str(name)
    }
}

/// 推进流半关闭状态的事件来源。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseEvent {
    /// 收到对端携带 END_STREAM 的帧。
    Received,
    /// 本端即将发送携带 END_STREAM 的帧。
    BeforeSend,
    /// 本端已经发送携带 END_STREAM 的帧。
    AfterSend,
}

/// 以 HTTP/2 模型表达的请求头部元数据。
#[derive(Clone, Debug)]
pub struct RequestMetadata {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
}

impl RequestMetadata {
    pub fn new(method: Method, uri: Uri, version: Version, headers: HeaderMap) -> Self {
        Self {
            method,
            uri,
            version,
            headers,
        }
    }
}

/// 响应头部元数据，由会话解码后交给流监听器。
#[derive(Clone, Debug)]
pub struct ResponseMetadata {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
}

impl ResponseMetadata {
    pub fn new(status: StatusCode, headers: HeaderMap) -> Self {
        Self {
            status,
            version: Version::HTTP_2,
            headers,
        }
    }
}

/// 开启流时发送的 HEADERS 帧。
#[derive(Clone, Debug)]
pub struct HeadersFrame {
    metadata: RequestMetadata,
    end_stream: bool,
}

impl HeadersFrame {
    pub fn new(metadata: RequestMetadata, end_stream: bool) -> Self {
        Self {
            metadata,
            end_stream,
        }
    }

    pub fn metadata(&self) -> &RequestMetadata {
        &self.metadata
    }

    pub fn is_end_stream(&self) -> bool {
        self.end_stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_error_code_maps_to_internal_error() {
        assert_eq!(ErrorCode::from_code(0x2), ErrorCode::InternalError);
        assert_eq!(ErrorCode::from_code(0xff), ErrorCode::InternalError);
        assert_eq!(ErrorCode::from_code(0x8), ErrorCode::Cancel);
        assert_eq!(ErrorCode::NoError.code(), 0);
    }

    #[test]
    fn upgrade_stream_is_client_initiated() {
        assert!(StreamId::UPGRADE.is_client_initiated());
        assert!(!StreamId(2).is_client_initiated());
        assert_eq!(StreamId::UPGRADE.to_string(), "#1");
    }
}
