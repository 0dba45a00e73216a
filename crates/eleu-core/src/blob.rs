use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};

/// An encrypted vault state in its transport form. Both fields are base64;
/// `ct` carries the authentication tag. The blob is opaque until decrypted,
/// so imports only check that it is shaped like one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherBlob {
    pub iv: String,
    #[serde(alias = "ciphertext")]
    pub ct: String,
}

impl CipherBlob {
    pub fn from_parts(iv: &[u8], ciphertext: &[u8]) -> Self {
        Self {
            iv: general_purpose::STANDARD.encode(iv),
            ct: general_purpose::STANDARD.encode(ciphertext),
        }
    }

    pub fn iv_bytes(&self) -> Result<Vec<u8>> {
        general_purpose::STANDARD
            .decode(self.iv.trim())
            .map_err(|_| VaultError::Decryption)
    }

    pub fn ct_bytes(&self) -> Result<Vec<u8>> {
        general_purpose::STANDARD
            .decode(self.ct.trim())
            .map_err(|_| VaultError::Decryption)
    }

    /// Parse an exported backup file. Accepts a JSON object with non-empty
    /// string `iv` and `ct` (or `ciphertext`) fields; extra fields are ignored.
    pub fn parse_import(contents: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(contents)
            .map_err(|e| VaultError::InvalidImportFormat(format!("not JSON: {e}")))?;
        let object = value
            .as_object()
            .ok_or_else(|| VaultError::InvalidImportFormat("expected a JSON object".into()))?;

        let iv = field(object, "iv")
            .ok_or_else(|| VaultError::InvalidImportFormat("missing `iv` field".into()))?;
        let ct = field(object, "ct")
            .or_else(|| field(object, "ciphertext"))
            .ok_or_else(|| VaultError::InvalidImportFormat("missing `ct` field".into()))?;

        Ok(Self {
            iv: iv.to_string(),
            ct: ct.to_string(),
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn field<'a>(object: &'a serde_json::Map<String, serde_json::Value>, name: &str) -> Option<&'a str> {
    object
        .get(name)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_minimal_shape() {
        let blob = CipherBlob::parse_import(r#"{"iv": "AAA", "ct": "BBB"}"#).unwrap();
        assert_eq!(blob.iv, "AAA");
        assert_eq!(blob.ct, "BBB");
    }

    #[test]
    fn accepts_ciphertext_alias_and_extra_fields() {
        let blob =
            CipherBlob::parse_import(r#"{"iv": "AAA", "ciphertext": "CCC", "ver": 1}"#).unwrap();
        assert_eq!(blob.ct, "CCC");
    }

    #[test]
    fn rejects_bad_shapes() {
        for input in [
            r#"{"foo": "bar"}"#,
            r#"{"iv": "AAA"}"#,
            r#"{"ct": "BBB"}"#,
            r#"{"iv": "", "ct": "BBB"}"#,
            r#"{"iv": 1, "ct": "BBB"}"#,
            r#"["AAA", "BBB"]"#,
            "not json at all",
        ] {
            assert!(
                matches!(
                    CipherBlob::parse_import(input),
                    Err(VaultError::InvalidImportFormat(_))
                ),
                "accepted {input}"
            );
        }
    }

    #[test]
    fn serialises_as_iv_and_ct() {
        let blob = CipherBlob::from_parts(&[0u8; 12], &[1, 2, 3]);
        let json: serde_json::Value = serde_json::from_str(&blob.to_json().unwrap()).unwrap();
        assert_eq!(json["iv"], "AAAAAAAAAAAAAAAA");
        assert_eq!(json["ct"], "AQID");
        assert_eq!(json.as_object().unwrap().len(), 2);
    }
}
