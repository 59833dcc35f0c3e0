//! Tag population of the simulated field.
//!
//! # TOML Example
//!
//! ```toml
//! inventory_chunk = 256
//!
//! [[type_a]]
//! uid = "04A1B2C3D4E5F6"
//! atqa = 0x0044
//! sak = 0x20
//!
//! [[type_b]]
//! pupi = "11223344"
//!
//! [[type_v]]
//! uid = "E0:04:01:00:87:65:43:21"
//! dsfid = 0x01
//!
//! [[i18000p3m3]]
//! uii = "E2000000"
//! xpc = [0x1234]
//! ```
//!
//! Identifiers are hex strings; `:`, `-` and spaces between bytes are ignored.

use super::field::{MIN_INVENTORY_CHUNK, SimulatedField};
use super::tags::{I18000p3m3Tag, TypeATag, TypeBTag, TypeVTag};
use nfc_common::config::ConfigError;
use nfc_common::consts::MAX_INVENTORY_RESULT_LEN;
use serde::{Deserialize, Serialize};

fn default_inventory_chunk() -> usize {
    MAX_INVENTORY_RESULT_LEN
}

fn default_atqa() -> u16 {
    0x0004
}

fn default_protocol_info() -> String {
    "008171".to_string()
}

/// Parse a hex byte string.
///
/// # Errors
/// `ConfigError::ValidationError` on an odd digit count or a non-hex digit.
pub fn parse_hex(field: &str, text: &str) -> Result<Vec<u8>, ConfigError> {
    let digits: Vec<char> = text
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | ' '))
        .collect();
    if digits.len() % 2 != 0 {
        return Err(ConfigError::ValidationError(format!(
            "{field} \"{text}\": odd number of hex digits"
        )));
    }
    digits
        .chunks(2)
        .map(|pair| {
            let hi = pair[0].to_digit(16);
            let lo = pair[1].to_digit(16);
            match (hi, lo) {
                (Some(hi), Some(lo)) => Ok((hi * 16 + lo) as u8),
                _ => Err(ConfigError::ValidationError(format!(
                    "{field} \"{text}\": invalid hex digit"
                ))),
            }
        })
        .collect()
}

fn fixed<const N: usize>(field: &str, text: &str) -> Result<[u8; N], ConfigError> {
    let bytes = parse_hex(field, text)?;
    <[u8; N]>::try_from(bytes.as_slice()).map_err(|_| {
        ConfigError::ValidationError(format!("{field} \"{text}\": expected {N} bytes"))
    })
}

/// ISO14443-3A tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeAEntry {
    /// 4, 7 or 10 byte UID
    pub uid: String,
    #[serde(default = "default_atqa")]
    pub atqa: u16,
    /// Final SAK (0x20 ISO-DEP, 0x40 NFC-DEP, 0x60 both)
    #[serde(default)]
    pub sak: u8,
    #[serde(default)]
    pub ats: Option<String>,
}

impl TypeAEntry {
    pub fn build(&self) -> Result<TypeATag, ConfigError> {
        let uid = parse_hex("type_a.uid", &self.uid)?;
        let ats = self.ats.as_deref().map(|a| parse_hex("type_a.ats", a)).transpose()?;
        TypeATag::new(&uid, self.atqa, self.sak, ats.as_deref())
    }
}

/// ISO14443-3B tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeBEntry {
    pub pupi: String,
    #[serde(default)]
    pub app_data: Option<String>,
    #[serde(default = "default_protocol_info")]
    pub protocol_info: String,
    #[serde(default)]
    pub afi: u8,
}

impl TypeBEntry {
    pub fn build(&self) -> Result<TypeBTag, ConfigError> {
        let pupi = parse_hex("type_b.pupi", &self.pupi)?;
        let app_data = match &self.app_data {
            Some(text) => fixed::<4>("type_b.app_data", text)?,
            None => [0; 4],
        };
        let protocol_info = fixed::<3>("type_b.protocol_info", &self.protocol_info)?;
        TypeBTag::new(&pupi, app_data, protocol_info, self.afi)
    }
}

/// ISO15693 tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeVEntry {
    /// UID, most significant byte (`E0`) first
    pub uid: String,
    #[serde(default)]
    pub dsfid: u8,
    #[serde(default)]
    pub afi: u8,
}

impl TypeVEntry {
    pub fn build(&self) -> Result<TypeVTag, ConfigError> {
        let uid = parse_hex("type_v.uid", &self.uid)?;
        TypeVTag::new(&uid, self.dsfid, self.afi)
    }
}

/// ISO18000-3M3 tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct I18000p3m3Entry {
    pub uii: String,
    #[serde(default)]
    pub xpc: Vec<u16>,
    #[serde(default)]
    pub handle: Option<u16>,
}

impl I18000p3m3Entry {
    pub fn build(&self) -> Result<I18000p3m3Tag, ConfigError> {
        let uii = parse_hex("i18000p3m3.uii", &self.uii)?;
        I18000p3m3Tag::new(&uii, &self.xpc, self.handle)
    }
}

/// Scenario file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    /// Inventory result chunk size [bytes]
    #[serde(default = "default_inventory_chunk")]
    pub inventory_chunk: usize,
    #[serde(default)]
    pub type_a: Vec<TypeAEntry>,
    #[serde(default)]
    pub type_b: Vec<TypeBEntry>,
    #[serde(default)]
    pub type_v: Vec<TypeVEntry>,
    #[serde(default)]
    pub i18000p3m3: Vec<I18000p3m3Entry>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            inventory_chunk: default_inventory_chunk(),
            type_a: Vec::new(),
            type_b: Vec::new(),
            type_v: Vec::new(),
            i18000p3m3: Vec::new(),
        }
    }
}

impl Scenario {
    pub fn tag_count(&self) -> usize {
        self.type_a.len() + self.type_b.len() + self.type_v.len() + self.i18000p3m3.len()
    }

    /// Check every entry without building a field.
    ///
    /// # Errors
    /// `ConfigError::ValidationError` naming the first malformed entry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.build_field().map(|_| ())
    }

    /// Build a switched-off field holding every tag of the scenario.
    pub fn build_field(&self) -> Result<SimulatedField, ConfigError> {
        if !(MIN_INVENTORY_CHUNK..=MAX_INVENTORY_RESULT_LEN).contains(&self.inventory_chunk) {
            return Err(ConfigError::ValidationError(format!(
                "inventory_chunk {} outside {MIN_INVENTORY_CHUNK}..={MAX_INVENTORY_RESULT_LEN}",
                self.inventory_chunk
            )));
        }
        let mut field = SimulatedField::new().with_inventory_chunk(self.inventory_chunk);
        for entry in &self.type_a {
            field.insert(entry.build()?);
        }
        for entry in &self.type_b {
            field.insert(entry.build()?);
        }
        for entry in &self.type_v {
            field.insert(entry.build()?);
        }
        for entry in &self.i18000p3m3 {
            field.insert(entry.build()?);
        }
        Ok(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nfc_common::config::ConfigLoader;

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("x", "04a1:B2-c3 d4").unwrap(), vec![0x04, 0xA1, 0xB2, 0xC3, 0xD4]);
        assert!(parse_hex("x", "0").is_err());
        assert!(parse_hex("x", "0G").is_err());
        assert!(parse_hex("x", "").unwrap().is_empty());
    }

    #[test]
    fn test_scenario_from_toml() {
        let scenario = Scenario::from_toml(
            r#"
inventory_chunk = 128

[[type_a]]
uid = "04A1B2C3D4E5F6"
atqa = 0x0044
sak = 0x20

[[type_b]]
pupi = "11223344"
app_data = "00000000"

[[type_v]]
uid = "E0:04:01:00:87:65:43:21"

[[i18000p3m3]]
uii = "E2000000"
handle = 0x1234
"#,
        )
        .unwrap();
        assert_eq!(scenario.tag_count(), 4);
        assert_eq!(scenario.type_b[0].protocol_info, "008171");
        let field = scenario.build_field().unwrap();
        assert_eq!(field.tag_count(), 4);
        assert!(!field.is_powered());
        assert_eq!(field.type_v_tags()[0].uid()[0], 0x21);
        assert_eq!(field.i18000p3m3_tags()[0].handle(), 0x1234);
    }

    #[test]
    fn test_invalid_entries() {
        let bad_uid = Scenario {
            type_a: vec![TypeAEntry {
                uid: "010203".to_string(),
                atqa: 4,
                sak: 0,
                ats: None,
            }],
            ..Scenario::default()
        };
        assert!(matches!(bad_uid.validate(), Err(ConfigError::ValidationError(_))));

        let bad_chunk = Scenario {
            inventory_chunk: 16,
            ..Scenario::default()
        };
        assert!(bad_chunk.validate().is_err());

        let bad_uii = Scenario {
            i18000p3m3: vec![I18000p3m3Entry {
                uii: "E20000".to_string(),
                xpc: Vec::new(),
                handle: None,
            }],
            ..Scenario::default()
        };
        assert!(bad_uii.validate().is_err());

        assert!(Scenario::default().validate().is_ok());
    }
}
