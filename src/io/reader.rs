//! A streaming parser for the imzML metadata document.
//!
//! The document is walked in order with a small state machine rather than
//! materializing a DOM. Every precondition of the format subset this crate
//! supports is checked at the point the document stream passes it, and the
//! first violation aborts the parse with a typed [`ImzMLParserError`].

use std::fmt::{self, Display};
use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use log::{debug, trace, warn};
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use crate::meta::{normalize_uuid, AcquisitionMetadata, ArrayKind, BinaryDataType, PixelRecord};
use crate::params::{ControlledVocabulary, Param, Unit};

const BUFFER_SIZE: usize = 10000;

/// The required `fileContent` fields, used to report which one a document
/// left out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataField {
    Uuid,
    Checksum,
    DataMode,
}

impl Display for MetadataField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid => f.write_str("UUID (IMS:1000080)"),
            Self::Checksum => f.write_str("ibd checksum (IMS:1000090 or IMS:1000091)"),
            Self::DataMode => f.write_str("data mode (IMS:1000030 or IMS:1000031)"),
        }
    }
}

/// The two halves of an external byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundsField {
    Length,
    Offset,
}

impl Display for BoundsField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Length => f.write_str("external array length (IMS:1000103)"),
            Self::Offset => f.write_str("external offset (IMS:1000102)"),
        }
    }
}

/// All the ways that imzML parsing can go wrong.
#[derive(Debug, Error)]
pub enum ImzMLParserError {
    #[error("The document could not be read at offset {offset}: {description}")]
    MalformedDocument { offset: usize, description: String },
    #[error("No `{0}` section was found")]
    MissingSection(&'static str),
    #[error("Missing required imzML {0}")]
    MissingField(MetadataField),
    #[error("The m/z array is not in m/z units (MS:1000040)")]
    InvalidUnit,
    #[error("Binary data must be external, stored in the ibd file")]
    InternalDataUnsupported,
    #[error("Compressed binary data arrays are not supported")]
    CompressionUnsupported,
    #[error("No data type was declared for the {0}")]
    MissingDataType(ArrayKind),
    #[error("No pixel size was found in the scan settings")]
    MissingPixelSize,
    #[error("More spectra were found than the declared spectrum count")]
    PixelCountOverflow,
    #[error("Spectrum {0} is missing one or both pixel coordinates")]
    MissingCoordinates(usize),
    #[error("Spectrum {0} has a binary data array that does not reference a known array group")]
    UnresolvedBinaryArray(usize),
    #[error("Spectrum {index} is missing the {field} of its {array}")]
    MissingBinaryBounds {
        index: usize,
        array: ArrayKind,
        field: BoundsField,
    },
    #[error("The declared spectrum count {declared} does not match the {found} spectra found")]
    SpectrumCountMismatch { declared: usize, found: usize },
}

pub type ParserResult = Result<ImzMLParserState, ImzMLParserError>;

/// The phase of the document the parser was in when an event arrived. The
/// same element names recur at different depths in mzML, so dispatch keys on
/// this as well as on the tag itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
pub enum ImzMLParserState {
    Start,
    MzML,
    FileDescription,
    FileContents,
    ReferenceParamGroupList,
    ReferenceParamGroup,
    ScanSettingsList,
    ScanSettings,
    Run,
    SpectrumList,
    Spectrum,
    ScanList,
    Scan,
    BinaryDataArrayList,
    BinaryDataArray,
    Binary,
    Done,
}

fn malformed<E: Display>(offset: usize, error: E) -> ImzMLParserError {
    ImzMLParserError::MalformedDocument {
        offset,
        description: error.to_string(),
    }
}

fn find_attribute(
    event: &BytesStart,
    key: &[u8],
    position: usize,
) -> Result<Option<String>, ImzMLParserError> {
    for attr_parsed in event.attributes() {
        match attr_parsed {
            Ok(attr) if attr.key.as_ref() == key => {
                return attr
                    .unescape_value()
                    .map(|value| Some(value.into_owned()))
                    .map_err(|e| malformed(position, e));
            }
            Ok(_) => {}
            Err(err) => return Err(malformed(position, err)),
        }
    }
    Ok(None)
}

/// Read the attributes of a `cvParam`/`userParam` element into a [`Param`].
fn handle_param(event: &BytesStart, position: usize) -> Result<Param, ImzMLParserError> {
    let mut param = Param::new();
    let mut unit_name = None;
    let mut unit_accession = None;
    for attr_parsed in event.attributes() {
        match attr_parsed {
            Ok(attr) => {
                let value = attr
                    .unescape_value()
                    .map_err(|e| malformed(position, e))?;
                match attr.key.as_ref() {
                    b"name" => param.name = value.into_owned(),
                    b"value" => param.value = value.into_owned(),
                    b"cvRef" => {
                        param.controlled_vocabulary = value
                            .parse::<ControlledVocabulary>()
                            .unwrap_or(ControlledVocabulary::Unknown)
                            .as_option();
                    }
                    b"accession" => {
                        let (cv, accession) = crate::params::curie_to_num(&value);
                        param.accession = accession;
                        if param.controlled_vocabulary.is_none() {
                            param.controlled_vocabulary = cv;
                        }
                    }
                    b"unitAccession" => unit_accession = Some(value.into_owned()),
                    b"unitName" => unit_name = Some(value.into_owned()),
                    _ => {}
                }
            }
            Err(err) => return Err(malformed(position, err)),
        }
    }
    if let Some(acc) = unit_accession {
        param.unit = Unit::from_accession(&acc);
    }
    if param.unit == Unit::Unknown {
        if let Some(name) = unit_name {
            param.unit = Unit::from_name(&name);
        }
    }
    Ok(param)
}

fn real_value(param: &Param, position: usize) -> Result<f64, ImzMLParserError> {
    param.coerce::<f64>().map_err(|e| {
        malformed(
            position,
            format_args!(
                "could not parse the value `{}` of `{}`: {}",
                param.value, param.name, e
            ),
        )
    })
}

fn index_value(param: &Param, position: usize) -> Result<u64, ImzMLParserError> {
    // Offsets and lengths are written as plain integers, but some producers
    // format them the way the run coordinates are formatted. The real-valued
    // fallback still only admits non-negative whole numbers.
    match param.coerce::<u64>() {
        Ok(v) => Ok(v),
        Err(_) => {
            let v = real_value(param, position)?;
            if v < 0.0 || v.fract() != 0.0 || v > u64::MAX as f64 {
                return Err(malformed(
                    position,
                    format_args!(
                        "the value `{}` of `{}` is not a non-negative integer",
                        param.value, param.name
                    ),
                ));
            }
            Ok(v as u64)
        }
    }
}

fn boolean_value(param: &Param) -> bool {
    param.value == "1" || param.value.eq_ignore_ascii_case("true")
}

/// Per-spectrum scratch, reset for every `spectrum` element.
#[derive(Debug, Default, Clone, Copy)]
struct PixelBuilder {
    x: Option<f64>,
    y: Option<f64>,
    mz_bounds: Option<(u64, u64)>,
    int_bounds: Option<(u64, u64)>,
}

/// A SAX-style accumulator for the whole document. Section-local
/// preconditions are enforced as the matching close tag goes by, so the
/// first violation in document order wins.
#[derive(Debug)]
struct DocumentBuilder {
    saw_mzml: bool,
    saw_file_description: bool,
    saw_file_content: bool,
    saw_ref_group_list: bool,
    saw_scan_settings_list: bool,
    saw_scan_settings: bool,
    saw_run: bool,
    saw_spectrum_list: bool,

    uuid: Option<String>,
    md5_checksum: Option<String>,
    sha_checksum: Option<String>,
    continuous_mode: Option<bool>,

    // Cleared by the no-compression marker; rejected if still set once the
    // param group list has gone by.
    compression_mz: bool,
    compression_int: bool,
    mz_data_type: Option<BinaryDataType>,
    int_data_type: Option<BinaryDataType>,
    pixel_size_um: f64,

    declared_count: usize,
    run_table: Vec<PixelRecord>,

    current_group: Option<ArrayKind>,
    current_array: Option<ArrayKind>,
    current_length: Option<u64>,
    current_offset: Option<u64>,
    pixel: PixelBuilder,
}

impl Default for DocumentBuilder {
    fn default() -> Self {
        Self {
            saw_mzml: false,
            saw_file_description: false,
            saw_file_content: false,
            saw_ref_group_list: false,
            saw_scan_settings_list: false,
            saw_scan_settings: false,
            saw_run: false,
            saw_spectrum_list: false,
            uuid: None,
            md5_checksum: None,
            sha_checksum: None,
            continuous_mode: None,
            compression_mz: true,
            compression_int: true,
            mz_data_type: None,
            int_data_type: None,
            pixel_size_um: 0.0,
            declared_count: 0,
            run_table: Vec::new(),
            current_group: None,
            current_array: None,
            current_length: None,
            current_offset: None,
            pixel: PixelBuilder::default(),
        }
    }
}

impl DocumentBuilder {
    /// The index of the spectrum currently being read.
    fn pixel_index(&self) -> usize {
        self.run_table.len()
    }

    fn require_file_content(&self) -> Result<(), ImzMLParserError> {
        if !self.saw_mzml {
            return Err(ImzMLParserError::MissingSection("mzML"));
        }
        if !self.saw_file_description {
            return Err(ImzMLParserError::MissingSection("fileDescription"));
        }
        if !self.saw_file_content {
            return Err(ImzMLParserError::MissingSection("fileContent"));
        }
        Ok(())
    }

    fn require_param_groups(&self) -> Result<(), ImzMLParserError> {
        self.require_file_content()?;
        if !self.saw_ref_group_list {
            return Err(ImzMLParserError::MissingSection(
                "referenceableParamGroupList",
            ));
        }
        Ok(())
    }

    fn require_scan_settings(&self) -> Result<(), ImzMLParserError> {
        self.require_param_groups()?;
        if !self.saw_scan_settings_list {
            return Err(ImzMLParserError::MissingSection("scanSettingsList"));
        }
        if !self.saw_scan_settings {
            return Err(ImzMLParserError::MissingSection("scanSettings"));
        }
        Ok(())
    }

    fn validate_file_content(&self) -> Result<(), ImzMLParserError> {
        if self.uuid.is_none() {
            return Err(ImzMLParserError::MissingField(MetadataField::Uuid));
        }
        if self.md5_checksum.is_none() && self.sha_checksum.is_none() {
            return Err(ImzMLParserError::MissingField(MetadataField::Checksum));
        }
        if self.continuous_mode.is_none() {
            return Err(ImzMLParserError::MissingField(MetadataField::DataMode));
        }
        Ok(())
    }

    fn validate_param_groups(&self) -> Result<(), ImzMLParserError> {
        if self.compression_mz || self.compression_int {
            return Err(ImzMLParserError::CompressionUnsupported);
        }
        if self.mz_data_type.is_none() {
            return Err(ImzMLParserError::MissingDataType(ArrayKind::Mass));
        }
        if self.int_data_type.is_none() {
            return Err(ImzMLParserError::MissingDataType(ArrayKind::Intensity));
        }
        Ok(())
    }

    fn validate_pixel_size(&self) -> Result<(), ImzMLParserError> {
        if self.pixel_size_um > 0.0 {
            Ok(())
        } else {
            Err(ImzMLParserError::MissingPixelSize)
        }
    }

    fn start_element(
        &mut self,
        event: &BytesStart,
        state: ImzMLParserState,
        position: usize,
    ) -> ParserResult {
        let elt_name = event.name();
        match elt_name.as_ref() {
            // Params are usually self-closed, but an expanded open/close
            // pair is just as valid.
            b"cvParam" | b"userParam" => {
                let param = handle_param(event, position)?;
                self.fill_param_into(param, state, position)?;
            }
            b"mzML" => {
                self.saw_mzml = true;
                return Ok(ImzMLParserState::MzML);
            }
            b"fileDescription" => {
                self.saw_file_description = true;
                return Ok(ImzMLParserState::FileDescription);
            }
            b"fileContent" => {
                self.saw_file_content = true;
                return Ok(ImzMLParserState::FileContents);
            }
            b"referenceableParamGroupList" => {
                self.require_file_content()?;
                self.saw_ref_group_list = true;
                return Ok(ImzMLParserState::ReferenceParamGroupList);
            }
            b"referenceableParamGroup" => {
                let id = find_attribute(event, b"id", position)?.unwrap_or_default();
                self.current_group = ArrayKind::from_group_id(&id);
                if self.current_group.is_none() {
                    trace!("Skipping referenceableParamGroup `{id}`");
                }
                return Ok(ImzMLParserState::ReferenceParamGroup);
            }
            b"scanSettingsList" => {
                self.require_param_groups()?;
                self.saw_scan_settings_list = true;
                return Ok(ImzMLParserState::ScanSettingsList);
            }
            b"scanSettings" => {
                self.saw_scan_settings = true;
                return Ok(ImzMLParserState::ScanSettings);
            }
            b"run" => {
                self.require_scan_settings()?;
                self.saw_run = true;
                return Ok(ImzMLParserState::Run);
            }
            b"spectrumList" => {
                let count = find_attribute(event, b"count", position)?.ok_or_else(|| {
                    malformed(position, "spectrumList has no count attribute")
                })?;
                self.declared_count = count.parse().map_err(|e| {
                    malformed(
                        position,
                        format_args!("could not parse spectrumList count `{count}`: {e}"),
                    )
                })?;
                self.saw_spectrum_list = true;
                return Ok(ImzMLParserState::SpectrumList);
            }
            b"spectrum" => {
                if self.pixel_index() >= self.declared_count {
                    return Err(ImzMLParserError::PixelCountOverflow);
                }
                self.pixel = PixelBuilder::default();
                return Ok(ImzMLParserState::Spectrum);
            }
            b"scanList" => return Ok(ImzMLParserState::ScanList),
            b"scan" => return Ok(ImzMLParserState::Scan),
            b"binaryDataArrayList" => return Ok(ImzMLParserState::BinaryDataArrayList),
            b"binaryDataArray" => {
                self.current_array = None;
                self.current_length = None;
                self.current_offset = None;
                return Ok(ImzMLParserState::BinaryDataArray);
            }
            b"binary" => return Ok(ImzMLParserState::Binary),
            _ => {}
        }
        Ok(state)
    }

    fn fill_param_into(
        &mut self,
        param: Param,
        state: ImzMLParserState,
        position: usize,
    ) -> Result<(), ImzMLParserError> {
        let accession = match (param.controlled_vocabulary, param.accession) {
            (Some(cv), Some(accession)) => (cv, accession),
            _ => return Ok(()),
        };
        match state {
            ImzMLParserState::FileContents => match accession {
                (ControlledVocabulary::IMS, 1000080) => {
                    self.uuid = Some(normalize_uuid(&param.value));
                }
                (ControlledVocabulary::IMS, 1000090) => {
                    self.md5_checksum = Some(param.value.to_ascii_uppercase());
                }
                (ControlledVocabulary::IMS, 1000091) => {
                    self.sha_checksum = Some(param.value.to_ascii_uppercase());
                }
                (ControlledVocabulary::IMS, 1000030) => {
                    if self.continuous_mode.is_some() {
                        warn!("Multiple data mode markers present, keeping the last one seen");
                    }
                    self.continuous_mode = Some(true);
                }
                (ControlledVocabulary::IMS, 1000031) => {
                    if self.continuous_mode.is_some() {
                        warn!("Multiple data mode markers present, keeping the last one seen");
                    }
                    self.continuous_mode = Some(false);
                }
                _ => {}
            },
            ImzMLParserState::ReferenceParamGroup => {
                let kind = match self.current_group {
                    Some(kind) => kind,
                    None => return Ok(()),
                };
                match accession {
                    // MS:1000576 - no compression
                    (ControlledVocabulary::MS, 1000576) => match kind {
                        ArrayKind::Mass => self.compression_mz = false,
                        ArrayKind::Intensity => self.compression_int = false,
                    },
                    // MS:1000514 - m/z array, which must carry m/z units
                    (ControlledVocabulary::MS, 1000514) if kind == ArrayKind::Mass => {
                        if param.unit != Unit::MZ {
                            return Err(ImzMLParserError::InvalidUnit);
                        }
                    }
                    // IMS:1000101 - external data
                    (ControlledVocabulary::IMS, 1000101) => {
                        if !boolean_value(&param) {
                            return Err(ImzMLParserError::InternalDataUnsupported);
                        }
                    }
                    (cv, acc) => {
                        if let Some(dtype) = BinaryDataType::from_accession(cv, acc) {
                            match kind {
                                ArrayKind::Mass => self.mz_data_type = Some(dtype),
                                ArrayKind::Intensity => self.int_data_type = Some(dtype),
                            }
                        }
                    }
                }
            }
            ImzMLParserState::ScanSettings => {
                // IMS:1000046 - pixel size, reported as an area
                if accession == (ControlledVocabulary::IMS, 1000046) {
                    self.pixel_size_um = real_value(&param, position)?.sqrt();
                }
            }
            ImzMLParserState::Scan => match accession {
                // IMS:1000050 / IMS:1000051 - position x / position y
                (ControlledVocabulary::IMS, 1000050) => {
                    self.pixel.x = Some(real_value(&param, position)?);
                }
                (ControlledVocabulary::IMS, 1000051) => {
                    self.pixel.y = Some(real_value(&param, position)?);
                }
                _ => {}
            },
            ImzMLParserState::BinaryDataArray => match accession {
                // IMS:1000103 - external array length
                (ControlledVocabulary::IMS, 1000103) => {
                    self.current_length = Some(index_value(&param, position)?);
                }
                // IMS:1000102 - external offset
                (ControlledVocabulary::IMS, 1000102) => {
                    self.current_offset = Some(index_value(&param, position)?);
                }
                _ => {}
            },
            _ => {}
        }
        Ok(())
    }

    fn empty_element(
        &mut self,
        event: &BytesStart,
        state: ImzMLParserState,
        position: usize,
    ) -> ParserResult {
        let elt_name = event.name();
        match elt_name.as_ref() {
            b"cvParam" | b"userParam" => {
                let param = handle_param(event, position)?;
                self.fill_param_into(param, state, position)?;
            }
            b"referenceableParamGroupRef" if state == ImzMLParserState::BinaryDataArray => {
                let group = find_attribute(event, b"ref", position)?.unwrap_or_default();
                match ArrayKind::from_group_id(&group) {
                    Some(kind) => self.current_array = Some(kind),
                    None => {
                        return Err(ImzMLParserError::UnresolvedBinaryArray(self.pixel_index()))
                    }
                }
            }
            _ => {}
        }
        Ok(state)
    }

    fn end_element(&mut self, event: &BytesEnd, state: ImzMLParserState) -> ParserResult {
        let elt_name = event.name();
        match elt_name.as_ref() {
            b"fileContent" => {
                self.validate_file_content()?;
                return Ok(ImzMLParserState::FileDescription);
            }
            b"fileDescription" => return Ok(ImzMLParserState::MzML),
            b"referenceableParamGroup" => {
                self.current_group = None;
                return Ok(ImzMLParserState::ReferenceParamGroupList);
            }
            b"referenceableParamGroupList" => {
                self.validate_param_groups()?;
                return Ok(ImzMLParserState::MzML);
            }
            b"scanSettings" => return Ok(ImzMLParserState::ScanSettingsList),
            b"scanSettingsList" => {
                self.validate_pixel_size()?;
                return Ok(ImzMLParserState::MzML);
            }
            b"scan" => return Ok(ImzMLParserState::ScanList),
            b"scanList" => return Ok(ImzMLParserState::Spectrum),
            b"binary" => return Ok(ImzMLParserState::BinaryDataArray),
            b"binaryDataArray" => {
                let index = self.pixel_index();
                let kind = self
                    .current_array
                    .take()
                    .ok_or(ImzMLParserError::UnresolvedBinaryArray(index))?;
                let length = self.current_length.take().ok_or(
                    ImzMLParserError::MissingBinaryBounds {
                        index,
                        array: kind,
                        field: BoundsField::Length,
                    },
                )?;
                let offset = self.current_offset.take().ok_or(
                    ImzMLParserError::MissingBinaryBounds {
                        index,
                        array: kind,
                        field: BoundsField::Offset,
                    },
                )?;
                match kind {
                    ArrayKind::Mass => self.pixel.mz_bounds = Some((length, offset)),
                    ArrayKind::Intensity => self.pixel.int_bounds = Some((length, offset)),
                }
                return Ok(ImzMLParserState::BinaryDataArrayList);
            }
            b"binaryDataArrayList" => return Ok(ImzMLParserState::Spectrum),
            b"spectrum" => {
                let index = self.pixel_index();
                let (x, y) = match (self.pixel.x, self.pixel.y) {
                    (Some(x), Some(y)) => (x, y),
                    _ => return Err(ImzMLParserError::MissingCoordinates(index)),
                };
                let (mz_length, mz_offset) =
                    self.pixel
                        .mz_bounds
                        .ok_or(ImzMLParserError::MissingBinaryBounds {
                            index,
                            array: ArrayKind::Mass,
                            field: BoundsField::Length,
                        })?;
                let (int_length, int_offset) =
                    self.pixel
                        .int_bounds
                        .ok_or(ImzMLParserError::MissingBinaryBounds {
                            index,
                            array: ArrayKind::Intensity,
                            field: BoundsField::Length,
                        })?;
                self.run_table.push(PixelRecord {
                    x,
                    y,
                    mz_length,
                    mz_offset,
                    int_length,
                    int_offset,
                });
                return Ok(ImzMLParserState::SpectrumList);
            }
            b"spectrumList" => return Ok(ImzMLParserState::Run),
            b"run" => return Ok(ImzMLParserState::MzML),
            b"mzML" => return Ok(ImzMLParserState::Done),
            _ => {}
        }
        Ok(state)
    }

    /// Final validation pass. Most of these re-run checks that already fired
    /// at section close, which keeps a truncated document (where the close
    /// tags never arrived) from slipping through.
    fn finish(self) -> Result<AcquisitionMetadata, ImzMLParserError> {
        self.require_file_content()?;
        self.validate_file_content()?;

        if !self.saw_ref_group_list {
            return Err(ImzMLParserError::MissingSection(
                "referenceableParamGroupList",
            ));
        }
        self.validate_param_groups()?;

        if !self.saw_scan_settings_list {
            return Err(ImzMLParserError::MissingSection("scanSettingsList"));
        }
        if !self.saw_scan_settings {
            return Err(ImzMLParserError::MissingSection("scanSettings"));
        }
        self.validate_pixel_size()?;

        if !self.saw_run {
            return Err(ImzMLParserError::MissingSection("run"));
        }
        if !self.saw_spectrum_list {
            return Err(ImzMLParserError::MissingSection("spectrumList"));
        }
        if self.run_table.len() != self.declared_count {
            return Err(ImzMLParserError::SpectrumCountMismatch {
                declared: self.declared_count,
                found: self.run_table.len(),
            });
        }

        let uuid = self
            .uuid
            .ok_or(ImzMLParserError::MissingField(MetadataField::Uuid))?;
        let continuous_mode = self
            .continuous_mode
            .ok_or(ImzMLParserError::MissingField(MetadataField::DataMode))?;
        let mz_data_type = self
            .mz_data_type
            .ok_or(ImzMLParserError::MissingDataType(ArrayKind::Mass))?;
        let int_data_type = self
            .int_data_type
            .ok_or(ImzMLParserError::MissingDataType(ArrayKind::Intensity))?;

        Ok(AcquisitionMetadata {
            uuid,
            md5_checksum: self.md5_checksum,
            sha_checksum: self.sha_checksum,
            continuous_mode,
            compression_mz: self.compression_mz,
            compression_int: self.compression_int,
            mz_data_type,
            int_data_type,
            pixel_size_um: self.pixel_size_um,
            run_table: self.run_table,
        })
    }
}

/// Parse an imzML document from an open [`BufRead`] source.
pub fn read_imzml_from<R: BufRead>(source: R) -> Result<AcquisitionMetadata, ImzMLParserError> {
    let mut reader = Reader::from_reader(source);
    reader.trim_text(true);
    let mut builder = DocumentBuilder::default();
    let mut state = ImzMLParserState::Start;
    let mut buffer = Vec::new();
    loop {
        match reader.read_event_into(&mut buffer) {
            Ok(Event::Start(ref e)) => {
                state = builder.start_element(e, state, reader.buffer_position())?;
            }
            Ok(Event::Empty(ref e)) => {
                state = builder.empty_element(e, state, reader.buffer_position())?;
            }
            Ok(Event::End(ref e)) => {
                state = builder.end_element(e, state)?;
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(malformed(reader.buffer_position(), err)),
        }
        buffer.clear();
        if state == ImzMLParserState::Done {
            break;
        }
    }
    builder.finish()
}

/// Parse the imzML document at `path` into an [`AcquisitionMetadata`].
///
/// The paired ibd file is never opened; only the offsets into it are
/// collected.
pub fn read_imzml<P: AsRef<Path>>(path: P) -> Result<AcquisitionMetadata, ImzMLParserError> {
    let path = path.as_ref();
    let handle = fs::File::open(path)
        .map_err(|e| malformed(0, format_args!("failed to open {}: {}", path.display(), e)))?;
    read_imzml_from(BufReader::with_capacity(BUFFER_SIZE, handle))
}

/// Check if the buffer contains an imzML file by looking for the IMS
/// controlled vocabulary. There isn't a formal mechanism to identify imzML
/// other than the presence of the IMS vocabulary in the `cvList` section.
pub fn is_imzml(buffer: &[u8]) -> bool {
    let mut reader = Reader::from_reader(io::Cursor::new(buffer));
    let mut buf = Vec::new();
    let mut in_cv_list = false;
    debug!("Checking for imzML format...");
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"cvList" => in_cv_list = true,
                b"cv" if in_cv_list => {
                    let declares_ims = e.attributes().any(|attr| {
                        attr.is_ok_and(|attr| {
                            attr.key.as_ref() == b"id"
                                && attr.unescape_value().is_ok_and(|v| v.as_ref() == "IMS")
                        })
                    });
                    if declares_ims {
                        return true;
                    }
                }
                _ => {}
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"cvList" => return false,
            Ok(Event::Eof) => return false,
            Ok(_) => {}
            Err(e) => {
                warn!("XML parsing error while checking for imzML format: {e}");
                return false;
            }
        }
        buf.clear();
    }
}
