//! File descriptors returned by SELECT FILE

use std::fmt;

/// Kind of file in the card's file system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Elementary file readable from outside the card
    WorkingEf,
    /// Elementary file used by the card OS only (keys, PINs)
    InternalEf,
    /// Dedicated file (directory)
    Df,
}

impl FileType {
    /// Short label used in listings
    pub fn label(self) -> &'static str {
        match self {
            FileType::WorkingEf => "wEF",
            FileType::InternalEf => "iEF",
            FileType::Df => " DF",
        }
    }
}

/// Elementary file structure, numbered as the low bits of the ISO 7816-4
/// file descriptor byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EfStructure {
    Unknown = 0,
    Transparent = 1,
    LinearFixed = 2,
    LinearFixedTlv = 3,
    LinearVariable = 4,
    LinearVariableTlv = 5,
    Cyclic = 6,
    CyclicTlv = 7,
}

impl EfStructure {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            1 => EfStructure::Transparent,
            2 => EfStructure::LinearFixed,
            3 => EfStructure::LinearFixedTlv,
            4 => EfStructure::LinearVariable,
            5 => EfStructure::LinearVariableTlv,
            6 => EfStructure::Cyclic,
            7 => EfStructure::CyclicTlv,
            _ => EfStructure::Unknown,
        }
    }

    pub fn is_record_based(self) -> bool {
        !matches!(self, EfStructure::Transparent | EfStructure::Unknown)
    }

    pub fn label(self) -> &'static str {
        match self {
            EfStructure::Unknown => "unknown",
            EfStructure::Transparent => "transpnt",
            EfStructure::LinearFixed => "linrfix",
            EfStructure::LinearFixedTlv => "linrfix(TLV)",
            EfStructure::LinearVariable => "linvar",
            EfStructure::LinearVariableTlv => "linvar(TLV)",
            EfStructure::Cyclic => "lincyc",
            EfStructure::CyclicTlv => "lincyc(TLV)",
        }
    }
}

/// Credential class required for an operation
///
/// Decoded from the high nibble of an access control byte. Values without a
/// generic meaning keep the whole byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessRule {
    Always,
    Pin1,
    Pin2,
    System,
    Never,
    Other(u8),
}

impl AccessRule {
    pub fn from_byte(byte: u8) -> Self {
        match byte >> 4 {
            0x0 => AccessRule::Always,
            0x1 => AccessRule::Pin1,
            0x2 => AccessRule::Pin2,
            0x4 => AccessRule::System,
            0xF => AccessRule::Never,
            _ => AccessRule::Other(byte),
        }
    }
}

impl fmt::Display for AccessRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessRule::Always => write!(f, "ALW"),
            AccessRule::Pin1 => write!(f, "PIN1"),
            AccessRule::Pin2 => write!(f, "PIN2"),
            AccessRule::System => write!(f, "SYS"),
            AccessRule::Never => write!(f, "NEV"),
            AccessRule::Other(b) => write!(f, "0x{:02X}", b),
        }
    }
}

/// Access control slots of a dedicated file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DfOperation {
    Select,
    Lock,
    Delete,
    Create,
    Rehabilitate,
    Invalidate,
    List,
}

impl DfOperation {
    pub const ALL: [DfOperation; 7] = [
        DfOperation::Select,
        DfOperation::Lock,
        DfOperation::Delete,
        DfOperation::Create,
        DfOperation::Rehabilitate,
        DfOperation::Invalidate,
        DfOperation::List,
    ];

    pub fn label(self) -> &'static str {
        match self {
            DfOperation::Select => "select",
            DfOperation::Lock => "lock",
            DfOperation::Delete => "delete",
            DfOperation::Create => "create",
            DfOperation::Rehabilitate => "rehab",
            DfOperation::Invalidate => "inval",
            DfOperation::List => "list",
        }
    }
}

/// Access control slots of an elementary file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EfOperation {
    Read,
    Update,
    Write,
    Erase,
    Rehabilitate,
    Invalidate,
}

impl EfOperation {
    pub const ALL: [EfOperation; 6] = [
        EfOperation::Read,
        EfOperation::Update,
        EfOperation::Write,
        EfOperation::Erase,
        EfOperation::Rehabilitate,
        EfOperation::Invalidate,
    ];

    pub fn label(self) -> &'static str {
        match self {
            EfOperation::Read => "read",
            EfOperation::Update => "update",
            EfOperation::Write => "write",
            EfOperation::Erase => "erase",
            EfOperation::Rehabilitate => "rehab",
            EfOperation::Invalidate => "inval",
        }
    }
}

/// Number of access control slots for a file type
pub fn acl_slots(file_type: FileType) -> usize {
    match file_type {
        FileType::Df => DfOperation::ALL.len(),
        FileType::WorkingEf | FileType::InternalEf => EfOperation::ALL.len(),
    }
}

/// Metadata of a selected file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub id: [u8; 2],
    pub file_type: FileType,
    /// Meaningful for elementary files only
    pub ef_structure: EfStructure,
    /// Size in bytes (transparent EF) or total record space
    pub size: usize,
    /// Record length for fixed-length record files
    pub record_length: Option<usize>,
    /// DF name (application identifier)
    pub name: Option<Vec<u8>>,
    /// Decoded access rule per operation slot
    ///
    /// Drivers decode with their card's own scheme. The raw bytes stay in
    /// `sec_attr`.
    pub acl: Vec<AccessRule>,
    pub sec_attr: Vec<u8>,
    pub prop_attr: Vec<u8>,
}

impl FileDescriptor {
    pub fn new(id: [u8; 2], file_type: FileType) -> Self {
        Self {
            id,
            file_type,
            ef_structure: if file_type == FileType::Df {
                EfStructure::Unknown
            } else {
                EfStructure::Transparent
            },
            size: 0,
            record_length: None,
            name: None,
            // Unknown access conditions default to "never"
            acl: vec![AccessRule::Never; acl_slots(file_type)],
            sec_attr: Vec::new(),
            prop_attr: Vec::new(),
        }
    }

    pub fn is_df(&self) -> bool {
        self.file_type == FileType::Df
    }

    fn rule_at(&self, slot: usize) -> AccessRule {
        self.acl.get(slot).copied().unwrap_or(AccessRule::Never)
    }

    pub fn df_rule(&self, op: DfOperation) -> AccessRule {
        self.rule_at(op as usize)
    }

    pub fn ef_rule(&self, op: EfOperation) -> AccessRule {
        self.rule_at(op as usize)
    }

    /// Operation labels paired with their decoded rules
    pub fn access_rules(&self) -> Vec<(&'static str, AccessRule)> {
        if self.is_df() {
            DfOperation::ALL
                .iter()
                .map(|&op| (op.label(), self.df_rule(op)))
                .collect()
        } else {
            EfOperation::ALL
                .iter()
                .map(|&op| (op.label(), self.ef_rule(op)))
                .collect()
        }
    }
}

/// Outcome of a successful SELECT FILE
///
/// A card may accept a selection without returning metadata the driver
/// understands. That is `NotDescribed`, which callers treat like a
/// directory whose type is unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectedFile {
    NotDescribed,
    Described(FileDescriptor),
}

impl SelectedFile {
    pub fn descriptor(&self) -> Option<&FileDescriptor> {
        match self {
            SelectedFile::Described(fd) => Some(fd),
            SelectedFile::NotDescribed => None,
        }
    }

    /// Whether LIST FILES may be attempted on this file
    pub fn may_have_children(&self) -> bool {
        self.descriptor().map_or(true, FileDescriptor::is_df)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_rule_decoding() {
        assert_eq!(AccessRule::from_byte(0x00), AccessRule::Always);
        assert_eq!(AccessRule::from_byte(0x10), AccessRule::Pin1);
        assert_eq!(AccessRule::from_byte(0x20), AccessRule::Pin2);
        assert_eq!(AccessRule::from_byte(0x41), AccessRule::System);
        assert_eq!(AccessRule::from_byte(0xFF), AccessRule::Never);
        assert_eq!(AccessRule::from_byte(0x3A), AccessRule::Other(0x3A));
        assert_eq!(AccessRule::Other(0x3A).to_string(), "0x3A");
    }

    #[test]
    fn test_slot_counts() {
        assert_eq!(FileDescriptor::new([0x3F, 0x00], FileType::Df).acl.len(), 7);
        assert_eq!(FileDescriptor::new([0x50, 0x15], FileType::WorkingEf).acl.len(), 6);
    }

    #[test]
    fn test_named_rules() {
        let mut fd = FileDescriptor::new([0x50, 0x32], FileType::WorkingEf);
        fd.acl = [0x00, 0x10, 0x20, 0x40, 0xF0, 0xF0]
            .into_iter()
            .map(AccessRule::from_byte)
            .collect();
        assert_eq!(fd.ef_rule(EfOperation::Read), AccessRule::Always);
        assert_eq!(fd.ef_rule(EfOperation::Update), AccessRule::Pin1);
        assert_eq!(fd.ef_rule(EfOperation::Erase), AccessRule::System);
        let rules = fd.access_rules();
        assert_eq!(rules[2], ("write", AccessRule::Pin2));
    }

    #[test]
    fn test_short_acl_reads_as_never() {
        let mut fd = FileDescriptor::new([0x3F, 0x00], FileType::Df);
        fd.acl = vec![AccessRule::Always];
        assert_eq!(fd.df_rule(DfOperation::List), AccessRule::Never);
    }

    #[test]
    fn test_selected_file_children() {
        assert!(SelectedFile::NotDescribed.may_have_children());
        let ef = FileDescriptor::new([0x50, 0x15], FileType::WorkingEf);
        assert!(!SelectedFile::Described(ef).may_have_children());
        let df = FileDescriptor::new([0x50, 0x15], FileType::Df);
        assert!(SelectedFile::Described(df).may_have_children());
    }

    #[test]
    fn test_structure_labels() {
        assert_eq!(EfStructure::from_bits(0x01).label(), "transpnt");
        assert_eq!(EfStructure::from_bits(0x05).label(), "linvar(TLV)");
        assert!(EfStructure::Cyclic.is_record_based());
    }
}
