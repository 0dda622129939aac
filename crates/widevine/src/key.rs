use std::fmt::{Display, Formatter};

use crate::protocol::license::key_container::KeyType;

/// A decrypted key from a license response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidevineKey {
    pub r#type: KeyType,
    pub id: Vec<u8>,
    pub key: Vec<u8>,
}

impl WidevineKey {
    pub fn is_content_key(&self) -> bool {
        self.r#type == KeyType::Content
    }
}

fn type_name(r#type: KeyType) -> &'static str {
    match r#type {
        KeyType::Signing => "SIGNING",
        KeyType::Content => "CONTENT",
        KeyType::KeyControl => "KEY_CONTROL",
        KeyType::OperatorSession => "OPERATOR_SESSION",
        KeyType::Entitlement => "ENTITLEMENT",
        KeyType::OemContent => "OEM_CONTENT",
    }
}

impl Display for WidevineKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {}:{}",
            type_name(self.r#type),
            hex::encode(&self.id),
            hex::encode(&self.key)
        )
    }
}
