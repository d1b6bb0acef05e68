//! Protobuf messages of the `portico.ClientCommands` service.
//!
//! Kept in sync with `proto/commands.proto` by hand. Every response carries an
//! optional application-level error; `code == 0` means success.

/// Application-level error carried inside a response.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResponseError {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub description: ::prost::alloc::string::String,
}

impl ResponseError {
    pub fn new(code: i32, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }

    /// Non-zero code.
    pub fn is_failure(&self) -> bool {
        self.code != 0
    }
}

/// Error codes shared by every response.
pub mod error_code {
    pub const NULL: i32 = 0;
    pub const UNKNOWN_ERROR: i32 = 1;
    pub const BAD_INPUT: i32 = 2;
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct AppGetVersionRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AppGetVersionResponse {
    #[prost(message, optional, tag = "1")]
    pub error: ::core::option::Option<ResponseError>,
    #[prost(string, tag = "2")]
    pub version: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub details: ::prost::alloc::string::String,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct AppShutdownRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AppShutdownResponse {
    #[prost(message, optional, tag = "1")]
    pub error: ::core::option::Option<ResponseError>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WalletCreateSessionRequest {
    #[prost(string, tag = "1")]
    pub mnemonic: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub app_key: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WalletCreateSessionResponse {
    #[prost(message, optional, tag = "1")]
    pub error: ::core::option::Option<ResponseError>,
    #[prost(string, tag = "2")]
    pub token: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub account_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AccountLocalLinkNewChallengeRequest {
    #[prost(string, tag = "1")]
    pub app_name: ::prost::alloc::string::String,
    #[prost(int32, tag = "2")]
    pub scope: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AccountLocalLinkNewChallengeResponse {
    #[prost(message, optional, tag = "1")]
    pub error: ::core::option::Option<ResponseError>,
    #[prost(string, tag = "2")]
    pub challenge_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AccountLocalLinkSolveChallengeRequest {
    #[prost(string, tag = "1")]
    pub challenge_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub answer: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AccountLocalLinkSolveChallengeResponse {
    #[prost(message, optional, tag = "1")]
    pub error: ::core::option::Option<ResponseError>,
    #[prost(string, tag = "2")]
    pub app_key: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FileUploadRequest {
    #[prost(string, tag = "1")]
    pub space_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub local_path: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FileUploadResponse {
    #[prost(message, optional, tag = "1")]
    pub error: ::core::option::Option<ResponseError>,
    #[prost(string, tag = "2")]
    pub object_id: ::prost::alloc::string::String,
}

impl FileUploadResponse {
    /// Application error, if the response carries a non-zero code.
    pub fn failure(&self) -> Option<&ResponseError> {
        self.error.as_ref().filter(|e| e.is_failure())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_file_upload_wire_format() {
        let request = FileUploadRequest {
            space_id: "space-1".into(),
            local_path: "/tmp/a.txt".into(),
        };
        let bytes = request.encode_to_vec();
        // field 1, length-delimited
        assert_eq!(bytes[0], 0x0a);
        assert_eq!(FileUploadRequest::decode(bytes.as_slice()).unwrap(), request);
    }

    #[test]
    fn test_failure_ignores_zero_code() {
        let ok = FileUploadResponse {
            error: Some(ResponseError::new(error_code::NULL, "")),
            object_id: "obj".into(),
        };
        assert!(ok.failure().is_none());

        let bad = FileUploadResponse {
            error: Some(ResponseError::new(error_code::BAD_INPUT, "no space")),
            object_id: String::new(),
        };
        assert_eq!(bad.failure().map(|e| e.code), Some(error_code::BAD_INPUT));
    }
}
