//! The subset of the Widevine license protocol (`license_protocol.proto`)
//! needed to request a license and read its content keys.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SignedMessage {
    #[prost(enumeration = "signed_message::MessageType", optional, tag = "1")]
    pub r#type: ::core::option::Option<i32>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub msg: ::core::option::Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub signature: ::core::option::Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub session_key: ::core::option::Option<Vec<u8>>,
}

pub mod signed_message {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum MessageType {
        LicenseRequest = 1,
        License = 2,
        ErrorResponse = 3,
        ServiceCertificateRequest = 4,
        ServiceCertificate = 5,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LicenseRequest {
    /// Serialized `ClientIdentification` blob of the device, passed through untouched.
    #[prost(bytes = "vec", optional, tag = "1")]
    pub client_id: ::core::option::Option<Vec<u8>>,
    #[prost(message, optional, tag = "2")]
    pub content_id: ::core::option::Option<license_request::ContentIdentification>,
    #[prost(enumeration = "license_request::RequestType", optional, tag = "3")]
    pub r#type: ::core::option::Option<i32>,
    #[prost(int64, optional, tag = "4")]
    pub request_time: ::core::option::Option<i64>,
    #[prost(enumeration = "ProtocolVersion", optional, tag = "6")]
    pub protocol_version: ::core::option::Option<i32>,
    #[prost(uint32, optional, tag = "7")]
    pub key_control_nonce: ::core::option::Option<u32>,
}

pub mod license_request {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ContentIdentification {
        #[prost(oneof = "content_identification::ContentIdVariant", tags = "1")]
        pub content_id_variant: ::core::option::Option<content_identification::ContentIdVariant>,
    }

    pub mod content_identification {
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct WidevinePsshData {
            #[prost(bytes = "vec", repeated, tag = "1")]
            pub pssh_data: Vec<Vec<u8>>,
            #[prost(enumeration = "super::super::LicenseType", optional, tag = "2")]
            pub license_type: ::core::option::Option<i32>,
            #[prost(bytes = "vec", optional, tag = "3")]
            pub request_id: ::core::option::Option<Vec<u8>>,
        }

        #[derive(Clone, PartialEq, ::prost::Oneof)]
        pub enum ContentIdVariant {
            #[prost(message, tag = "1")]
            WidevinePsshData(WidevinePsshData),
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum RequestType {
        New = 1,
        Renewal = 2,
        Release = 3,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct License {
    #[prost(message, repeated, tag = "3")]
    pub key: Vec<license::KeyContainer>,
}

pub mod license {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct KeyContainer {
        #[prost(bytes = "vec", optional, tag = "1")]
        pub id: ::core::option::Option<Vec<u8>>,
        #[prost(bytes = "vec", optional, tag = "2")]
        pub iv: ::core::option::Option<Vec<u8>>,
        #[prost(bytes = "vec", optional, tag = "3")]
        pub key: ::core::option::Option<Vec<u8>>,
        #[prost(enumeration = "key_container::KeyType", optional, tag = "4")]
        pub r#type: ::core::option::Option<i32>,
    }

    pub mod key_container {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
        #[repr(i32)]
        pub enum KeyType {
            Signing = 1,
            Content = 2,
            KeyControl = 3,
            OperatorSession = 4,
            Entitlement = 5,
            OemContent = 6,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum LicenseType {
    Streaming = 1,
    Offline = 2,
    Automatic = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ProtocolVersion {
    Version20 = 20,
    Version21 = 21,
    Version22 = 22,
}

/// Payload of a Widevine `pssh` box.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WidevinePsshData {
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub key_ids: Vec<Vec<u8>>,
    #[prost(string, optional, tag = "3")]
    pub provider: ::core::option::Option<String>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub content_id: ::core::option::Option<Vec<u8>>,
}
