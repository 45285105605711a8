//! The in-memory description of an imzML acquisition: the file-level
//! metadata extracted from `fileContent` and the referenceable param groups,
//! plus the per-pixel table of byte ranges locating each spectrum's arrays
//! in the external binary file.

use std::fmt::{self, Display};

use crate::params::{ControlledVocabulary, Param};

/// Which of the two logical binary arrays a param group or
/// `binaryDataArray` element describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayKind {
    Mass,
    Intensity,
}

impl Display for ArrayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mass => f.write_str("m/z array"),
            Self::Intensity => f.write_str("intensity array"),
        }
    }
}

impl ArrayKind {
    /// Resolve a `referenceableParamGroup` identifier to an array kind.
    /// `intensities` is a historical alias some writers emit.
    pub fn from_group_id(id: &str) -> Option<ArrayKind> {
        match id {
            "mzArray" => Some(Self::Mass),
            "intensityArray" | "intensities" => Some(Self::Intensity),
            _ => None,
        }
    }

    pub const fn group_id(&self) -> &'static str {
        match self {
            Self::Mass => "mzArray",
            Self::Intensity => "intensityArray",
        }
    }
}

/// The binary encoding of an array in the external data file. imzML restricts
/// the m/z and intensity arrays to these four fixed-width encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryDataType {
    Int32,
    Int64,
    Float32,
    Float64,
}

impl BinaryDataType {
    pub const fn size_of(&self) -> u64 {
        match self {
            Self::Int32 | Self::Float32 => 4,
            Self::Int64 | Self::Float64 => 8,
        }
    }

    /// Map a data type term onto the encoding it names. The 32- and 64-bit
    /// integer terms come from the imaging ontology, the float terms from
    /// the PSI-MS ontology.
    pub fn from_accession(cv: ControlledVocabulary, accession: u32) -> Option<Self> {
        match (cv, accession) {
            (ControlledVocabulary::IMS, 1000141) => Some(Self::Int32),
            (ControlledVocabulary::IMS, 1000142) => Some(Self::Int64),
            (ControlledVocabulary::MS, 1000521) => Some(Self::Float32),
            (ControlledVocabulary::MS, 1000523) => Some(Self::Float64),
            _ => None,
        }
    }

    pub fn to_param(&self) -> Param {
        match self {
            Self::Int32 => ControlledVocabulary::IMS.param("IMS:1000141", "32-bit integer"),
            Self::Int64 => ControlledVocabulary::IMS.param("IMS:1000142", "64-bit integer"),
            Self::Float32 => ControlledVocabulary::MS.param("MS:1000521", "32-bit float"),
            Self::Float64 => ControlledVocabulary::MS.param("MS:1000523", "64-bit float"),
        }
    }
}

impl Display for BinaryDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int32 => f.write_str("int32"),
            Self::Int64 => f.write_str("int64"),
            Self::Float32 => f.write_str("float32"),
            Self::Float64 => f.write_str("float64"),
        }
    }
}

/// Strip the `{`, `}` and `-` decorations from a textual UUID and upper-case
/// the remaining hexadecimal digits. Idempotent.
pub fn normalize_uuid(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, '{' | '}' | '-'))
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// One row of the run table: where a single pixel's spectrum lives in the
/// external binary file. Lengths count array elements, offsets count bytes.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct PixelRecord {
    pub x: f64,
    pub y: f64,
    pub mz_length: u64,
    pub mz_offset: u64,
    pub int_length: u64,
    pub int_offset: u64,
}

/// Everything this crate extracts from an imzML document. An instance is
/// either fully populated by a successful parse or never handed out at all.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionMetadata {
    /// 32 upper-case hexadecimal digits, shared with the header of the
    /// external binary file.
    pub uuid: String,
    /// MD5 digest of the binary file, upper-case hex, when declared.
    pub md5_checksum: Option<String>,
    /// SHA-1 digest of the binary file, upper-case hex, when declared.
    pub sha_checksum: Option<String>,
    /// `true` when all spectra share one m/z axis, `false` when each pixel
    /// carries its own (processed mode).
    pub continuous_mode: bool,
    pub compression_mz: bool,
    pub compression_int: bool,
    pub mz_data_type: BinaryDataType,
    pub int_data_type: BinaryDataType,
    /// Square root of the declared pixel area term. Carried through exactly
    /// as the upstream tools compute it.
    pub pixel_size_um: f64,
    /// One entry per spectrum, in document order.
    pub run_table: Vec<PixelRecord>,
}

impl AcquisitionMetadata {
    pub fn pixel_count(&self) -> usize {
        self.run_table.len()
    }

    /// The pixel area value the document declared, reconstructed from the
    /// derived size.
    pub fn pixel_area(&self) -> f64 {
        self.pixel_size_um * self.pixel_size_um
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn uuid_normalization() {
        let canonical = "906C875347AE43EE8FA8F00E6E9288FA";
        assert_eq!(
            normalize_uuid("{906c8753-47ae-43ee-8fa8-f00e6e9288fa}"),
            canonical
        );
        assert_eq!(
            normalize_uuid("906c8753-47ae-43ee-8fa8-f00e6e9288fa"),
            canonical
        );
        assert_eq!(normalize_uuid(canonical), canonical, "must be idempotent");
    }

    #[test]
    fn data_type_terms() {
        for dtype in [
            BinaryDataType::Int32,
            BinaryDataType::Int64,
            BinaryDataType::Float32,
            BinaryDataType::Float64,
        ] {
            let param = dtype.to_param();
            let resolved = BinaryDataType::from_accession(
                param.controlled_vocabulary.unwrap(),
                param.accession.unwrap(),
            );
            assert_eq!(resolved, Some(dtype));
        }
        assert_eq!(BinaryDataType::Float64.size_of(), 8);
        assert_eq!(BinaryDataType::Int32.size_of(), 4);
    }

    #[test]
    fn group_id_resolution() {
        assert_eq!(ArrayKind::from_group_id("mzArray"), Some(ArrayKind::Mass));
        assert_eq!(
            ArrayKind::from_group_id("intensityArray"),
            Some(ArrayKind::Intensity)
        );
        assert_eq!(
            ArrayKind::from_group_id("intensities"),
            Some(ArrayKind::Intensity)
        );
        assert_eq!(ArrayKind::from_group_id("ticArray"), None);
    }
}
