//! Card images for the simulated reader
//!
//! A [`CardImage`] describes the file system of a simulated card. Images are
//! stored as JSON: identifiers, names and access bytes in hex, file content
//! in base64.
//!
//! ```json
//! {
//!   "atr": "3B:02:14:50",
//!   "flavor": "iso",
//!   "root": {
//!     "id": "3F00", "type": "df", "acl": "00000000000000",
//!     "children": [
//!       { "id": "0002", "type": "working_ef", "content": "AAECAw==" }
//!     ]
//!   }
//! }
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::Path as FsPath;

use log::info;
use serde::{Deserialize, Serialize};

use crate::card::build_atr;
use crate::error::{Error, Result};
use crate::fs::MAX_PATH_SIZE;

/// Hex encoding for byte fields; `:` and spaces are accepted when reading
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode_upper(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        crate::util::hex_to_bin(&s).map_err(serde::de::Error::custom)
    }
}

/// Base64 encoding of file content
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        if s.is_empty() {
            return Ok(Vec::new());
        }
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Base64 encoding of a record list
mod base64_records {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(records: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(records.len()))?;
        for record in records {
            seq.serialize_element(&STANDARD.encode(record))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded: Vec<String> = Deserialize::deserialize(deserializer)?;
        encoded
            .iter()
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .collect()
    }
}

/// Which command set the simulated card speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardFlavor {
    /// ISO 7816-4 FCP replies and SetCOS style LIST FILES
    #[default]
    Iso,
    /// Cryptoflex proprietary replies, `C0` class and directory entries
    Flex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageFileKind {
    Df,
    WorkingEf,
    InternalEf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStructure {
    #[default]
    Transparent,
    LinearFixed,
    LinearVariable,
    Cyclic,
}

impl ImageStructure {
    /// Low bits of the ISO file descriptor byte
    pub fn fdb_bits(self) -> u8 {
        match self {
            ImageStructure::Transparent => 0x01,
            ImageStructure::LinearFixed => 0x02,
            ImageStructure::LinearVariable => 0x04,
            ImageStructure::Cyclic => 0x06,
        }
    }
}

/// One file of a card image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFile {
    #[serde(with = "hex_bytes")]
    pub id: Vec<u8>,
    #[serde(rename = "type")]
    pub kind: ImageFileKind,
    #[serde(default)]
    pub structure: ImageStructure,
    /// DF name (AID)
    #[serde(default, with = "hex_bytes", skip_serializing_if = "Vec::is_empty")]
    pub name: Vec<u8>,
    /// Security attribute bytes exactly as the card reports them
    #[serde(default, with = "hex_bytes", skip_serializing_if = "Vec::is_empty")]
    pub acl: Vec<u8>,
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<u8>,
    #[serde(default, with = "base64_records", skip_serializing_if = "Vec::is_empty")]
    pub records: Vec<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ImageFile>,
}

impl ImageFile {
    pub fn df(id: [u8; 2], children: Vec<ImageFile>) -> Self {
        Self {
            id: id.to_vec(),
            kind: ImageFileKind::Df,
            structure: ImageStructure::Transparent,
            name: Vec::new(),
            acl: Vec::new(),
            content: Vec::new(),
            records: Vec::new(),
            children,
        }
    }

    pub fn transparent(id: [u8; 2], content: &[u8]) -> Self {
        Self {
            kind: ImageFileKind::WorkingEf,
            content: content.to_vec(),
            ..Self::df(id, Vec::new())
        }
    }

    pub fn records(id: [u8; 2], structure: ImageStructure, records: Vec<Vec<u8>>) -> Self {
        Self {
            kind: ImageFileKind::WorkingEf,
            structure,
            records,
            ..Self::df(id, Vec::new())
        }
    }

    pub fn with_name(mut self, name: &[u8]) -> Self {
        self.name = name.to_vec();
        self
    }

    pub fn with_acl(mut self, acl: &[u8]) -> Self {
        self.acl = acl.to_vec();
        self
    }

    pub fn with_kind(mut self, kind: ImageFileKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn is_df(&self) -> bool {
        self.kind == ImageFileKind::Df
    }

    pub fn fid(&self) -> [u8; 2] {
        match self.id.as_slice() {
            [a, b] => [*a, *b],
            _ => [0xFF, 0xFF],
        }
    }

    /// Size reported in select replies
    pub fn size(&self) -> usize {
        if self.structure == ImageStructure::Transparent {
            self.content.len()
        } else {
            self.records.iter().map(Vec::len).sum()
        }
    }

    pub fn max_record_len(&self) -> usize {
        self.records.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn child(&self, fid: [u8; 2]) -> Option<(usize, &ImageFile)> {
        self.children.iter().enumerate().find(|(_, c)| c.fid() == fid)
    }
}

/// A complete simulated card
///
/// An image may give `historical` bytes instead of a full `atr`; the card
/// then answers with a T=1 ATR built around them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardImage {
    #[serde(default, with = "hex_bytes", skip_serializing_if = "Vec::is_empty")]
    pub atr: Vec<u8>,
    #[serde(default, with = "hex_bytes", skip_serializing_if = "Vec::is_empty")]
    pub historical: Vec<u8>,
    #[serde(default)]
    pub flavor: CardFlavor,
    /// Answer with `61XX`/`9FXX` and wait for GET RESPONSE, as T=0 cards do
    #[serde(default)]
    pub t0: bool,
    pub root: ImageFile,
}

impl CardImage {
    /// Load and validate an image from a JSON file
    pub fn load(path: &FsPath) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let image = Self::from_json(&text)?;
        info!("Loaded card image from {:?}", path);
        Ok(image)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let mut image: CardImage = serde_json::from_str(text)
            .map_err(|e| Error::Config(format!("invalid card image: {}", e)))?;
        if image.atr.is_empty() && !image.historical.is_empty() {
            image.atr = build_atr(&image.historical);
        }
        image.validate()?;
        Ok(image)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("cannot serialize card image: {}", e)))
    }

    /// Check the structural rules the simulated card relies on
    pub fn validate(&self) -> Result<()> {
        if self.atr.len() < 2 || self.atr.len() > 33 {
            return Err(Error::Config(format!("ATR of {} bytes", self.atr.len())));
        }
        if !self.root.is_df() || self.root.id != [0x3F, 0x00] {
            return Err(Error::Config("root must be DF 3F00".to_string()));
        }
        validate_file(&self.root, 1)
    }

    /// Built-in demo card: a SetCOS style card with a PKCS#15 application
    pub fn demo() -> Self {
        let odf = ImageFile::transparent([0x50, 0x31], &[0xA8, 0x06, 0x30, 0x04, 0x04, 0x02, 0x44, 0x01])
            .with_acl(&[0x00, 0x10, 0x10, 0x10, 0x10, 0x10]);
        let cdf = ImageFile::records(
            [0x44, 0x01],
            ImageStructure::LinearFixed,
            vec![b"certificate one".to_vec(), b"certificate two".to_vec()],
        )
        .with_acl(&[0x00, 0x20, 0x20, 0xF0, 0xF0, 0xF0]);
        let key = ImageFile::transparent([0x00, 0x11], &[0x5A; 16])
            .with_kind(ImageFileKind::InternalEf)
            .with_acl(&[0xFF, 0x41, 0x41, 0x41, 0xFF, 0xFF]);
        let pkcs15 = ImageFile::df([0x50, 0x15], vec![odf, cdf, key])
            .with_name(&[0xA0, 0x00, 0x00, 0x00, 0x63, 0x50, 0x4B, 0x43, 0x53, 0x2D, 0x31, 0x35])
            .with_acl(&[0x00, 0x40, 0x40, 0x10, 0x40, 0x40, 0x00]);
        let serial = ImageFile::transparent([0x00, 0x02], b"CARDLINK-0001")
            .with_acl(&[0x00, 0xF0, 0xF0, 0xF0, 0xF0, 0xF0]);
        let root = ImageFile::df([0x3F, 0x00], vec![serial, pkcs15])
            .with_acl(&[0x00, 0x40, 0x40, 0x40, 0x40, 0x40, 0x00]);

        Self {
            atr: vec![0x3B, 0x02, 0x14, 0x50],
            historical: Vec::new(),
            flavor: CardFlavor::Iso,
            t0: false,
            root,
        }
    }
}

fn validate_file(file: &ImageFile, depth: usize) -> Result<()> {
    if file.id.len() != 2 {
        return Err(Error::Config(format!(
            "file identifier {} is not 2 bytes",
            hex::encode_upper(&file.id)
        )));
    }
    if depth > MAX_PATH_SIZE / 2 {
        return Err(Error::Config("file tree too deep".to_string()));
    }
    if !file.is_df() && !file.children.is_empty() {
        return Err(Error::Config(format!(
            "elementary file {} has children",
            hex::encode_upper(&file.id)
        )));
    }
    if file.records.iter().any(|r| r.is_empty() || r.len() > 255) {
        return Err(Error::Config(format!(
            "record of file {} must hold 1 to 255 bytes",
            hex::encode_upper(&file.id)
        )));
    }
    let mut seen = HashSet::new();
    for child in &file.children {
        if !seen.insert(child.id.clone()) {
            return Err(Error::Config(format!(
                "duplicate file {} in {}",
                hex::encode_upper(&child.id),
                hex::encode_upper(&file.id)
            )));
        }
        validate_file(child, depth + 1)?;
    }
    Ok(())
}
