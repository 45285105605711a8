//! Serializes an [`AcquisitionMetadata`] back into a conformant imzML
//! document. The output carries the same sections the parser requires, so a
//! document produced here always parses back to an equal value.

use std::fmt::Debug;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::Error as XMLError;
use quick_xml::Writer;
use thiserror::Error;
use uuid::Uuid;

use crate::meta::{AcquisitionMetadata, ArrayKind, BinaryDataType, PixelRecord};
use crate::params::{ControlledVocabulary, Param, Unit};

const BUFFER_SIZE: usize = 10000;

#[derive(Debug, Error)]
pub enum ImzMLWriterError {
    #[error("An error occurred while writing XML: {0}")]
    XMLError(#[from] XMLError),
    #[error("An IO error occurred: {0}")]
    IOError(#[from] io::Error),
    #[error("`{0}` is not a valid UUID: {1}")]
    InvalidUuid(String, #[source] uuid::Error),
}

pub type WriterResult = Result<(), ImzMLWriterError>;

macro_rules! bstart {
    ($e:tt) => {
        BytesStart::from_content($e, $e.len())
    };
}

macro_rules! attrib {
    ($name:expr, $value:expr, $elt:ident) => {
        let key = $name.as_bytes();
        let value = $value.as_bytes();
        $elt.push_attribute((key, value));
    };
}

macro_rules! start_event {
    ($writer:ident, $target:ident) => {
        $writer.handle.write_event(Event::Start($target.borrow()))?;
    };
}

macro_rules! end_event {
    ($writer:ident, $target:ident) => {
        $writer.handle.write_event(Event::End($target.to_end()))?;
    };
}

/// Writes an imzML metadata document to any [`Write`] sink, tab-indented.
pub struct ImzMLWriter<W: Write> {
    handle: Writer<BufWriter<W>>,
}

impl<W: Write> Debug for ImzMLWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImzMLWriter")
            .field("handle", &"...")
            .finish()
    }
}

impl<W: Write> ImzMLWriter<W> {
    pub fn new(file: W) -> ImzMLWriter<W> {
        let handle = BufWriter::with_capacity(BUFFER_SIZE, file);
        Self {
            handle: Writer::new_with_indent(handle, b'\t', 1),
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.handle.get_mut().flush()
    }

    /// Write the whole document for `metadata`.
    pub fn write(&mut self, metadata: &AcquisitionMetadata) -> WriterResult {
        self.start_document()?;
        self.write_cv_list()?;
        self.write_file_description(metadata)?;
        self.write_param_group_list(metadata)?;
        self.write_scan_settings(metadata)?;
        self.write_run(metadata)?;
        self.handle
            .write_event(Event::End(BytesEnd::new("mzML")))?;
        self.flush()?;
        Ok(())
    }

    fn write_param(&mut self, param: &Param) -> WriterResult {
        let accession_str = param.curie();
        let cv_prefix = param.controlled_vocabulary.as_ref().map(|cv| cv.prefix());
        let mut elt = if !param.is_controlled() {
            bstart!("userParam")
        } else {
            let mut elt = bstart!("cvParam");
            if let Some(accession) = &accession_str {
                attrib!("accession", accession, elt);
            }
            if let Some(cv_ref) = &cv_prefix {
                attrib!("cvRef", cv_ref, elt);
            }
            elt
        };

        attrib!("name", param.name, elt);
        if !param.value.is_empty() {
            attrib!("value", param.value, elt);
        }
        match param.unit {
            Unit::Unknown => {}
            unit => {
                let (unit_acc, unit_name) = unit.for_param();
                let mut split = unit_acc.split(':');
                if let Some(prefix) = split.next() {
                    attrib!("unitCvRef", prefix, elt);
                } else {
                    attrib!("unitCvRef", "UO", elt);
                }
                attrib!("unitAccession", unit_acc, elt);
                attrib!("unitName", unit_name, elt);
            }
        }
        self.handle.write_event(Event::Empty(elt))?;
        Ok(())
    }

    fn start_document(&mut self) -> WriterResult {
        self.handle.write_event(Event::Decl(BytesDecl::new(
            "1.0",
            Some("UTF-8"),
            Some("no"),
        )))?;
        let mut mzml = bstart!("mzML");
        attrib!("version", "1.1", mzml);
        attrib!("xmlns", "http://psi.hupo.org/ms/mzml", mzml);
        attrib!(
            "xmlns:xsi",
            "http://www.w3.org/2001/XMLSchema-instance",
            mzml
        );
        attrib!(
            "xsi:schemaLocation",
            "http://psi.hupo.org/ms/mzml http://psidev.info/files/ms/mzML/xsd/mzML1.1.0_idx.xsd",
            mzml
        );
        self.handle.write_event(Event::Start(mzml))?;
        Ok(())
    }

    fn write_cv(&mut self, id: &str, full_name: &str, version: &str, uri: &str) -> WriterResult {
        let mut cv = bstart!("cv");
        attrib!("id", id, cv);
        attrib!("fullName", full_name, cv);
        attrib!("version", version, cv);
        attrib!("URI", uri, cv);
        self.handle.write_event(Event::Empty(cv))?;
        Ok(())
    }

    fn write_cv_list(&mut self) -> WriterResult {
        let mut cv_list = bstart!("cvList");
        attrib!("count", "3", cv_list);
        start_event!(self, cv_list);
        self.write_cv(
            "MS",
            "Proteomics Standards Initiative Mass Spectrometry Ontology",
            "1.3.1",
            "http://psidev.info/ms/mzML/psi-ms.obo",
        )?;
        self.write_cv(
            "UO",
            "Unit Ontology",
            "1.15",
            "http://obo.cvs.sourceforge.net/obo/obo/ontology/phenotype/unit.obo",
        )?;
        self.write_cv(
            "IMS",
            "Imaging MS Ontology",
            "0.9.1",
            "http://www.maldi-msi.org/download/imzml/imagingMS.obo",
        )?;
        end_event!(self, cv_list);
        Ok(())
    }

    fn write_file_description(&mut self, metadata: &AcquisitionMetadata) -> WriterResult {
        let fd = bstart!("fileDescription");
        start_event!(self, fd);
        let fc = bstart!("fileContent");
        start_event!(self, fc);

        let uuid = Uuid::parse_str(&metadata.uuid)
            .map_err(|e| ImzMLWriterError::InvalidUuid(metadata.uuid.clone(), e))?;
        let braced = format!("{{{}}}", uuid.hyphenated()).to_ascii_uppercase();
        self.write_param(&ControlledVocabulary::IMS.param_val(
            "IMS:1000080",
            "universally unique identifier",
            braced,
        ))?;
        if metadata.continuous_mode {
            self.write_param(&ControlledVocabulary::IMS.param("IMS:1000030", "continuous"))?;
        } else {
            self.write_param(&ControlledVocabulary::IMS.param("IMS:1000031", "processed"))?;
        }
        if let Some(md5) = &metadata.md5_checksum {
            self.write_param(&ControlledVocabulary::IMS.param_val(
                "IMS:1000090",
                "ibd MD5",
                md5,
            ))?;
        }
        if let Some(sha) = &metadata.sha_checksum {
            self.write_param(&ControlledVocabulary::IMS.param_val(
                "IMS:1000091",
                "ibd SHA-1",
                sha,
            ))?;
        }

        end_event!(self, fc);
        end_event!(self, fd);
        Ok(())
    }

    fn write_param_group(&mut self, kind: ArrayKind, dtype: BinaryDataType) -> WriterResult {
        let mut group = bstart!("referenceableParamGroup");
        attrib!("id", kind.group_id(), group);
        start_event!(self, group);
        let array_term = match kind {
            ArrayKind::Mass => ControlledVocabulary::MS
                .param("MS:1000514", "m/z array")
                .with_unit_t(&Unit::MZ),
            ArrayKind::Intensity => ControlledVocabulary::MS
                .param("MS:1000515", "intensity array")
                .with_unit_t(&Unit::DetectorCounts),
        };
        self.write_param(&array_term)?;
        self.write_param(&ControlledVocabulary::MS.param("MS:1000576", "no compression"))?;
        self.write_param(&ControlledVocabulary::IMS.param_val(
            "IMS:1000101",
            "external data",
            "true",
        ))?;
        self.write_param(&dtype.to_param())?;
        end_event!(self, group);
        Ok(())
    }

    fn write_param_group_list(&mut self, metadata: &AcquisitionMetadata) -> WriterResult {
        let mut list = bstart!("referenceableParamGroupList");
        attrib!("count", "2", list);
        start_event!(self, list);
        self.write_param_group(ArrayKind::Mass, metadata.mz_data_type)?;
        self.write_param_group(ArrayKind::Intensity, metadata.int_data_type)?;
        end_event!(self, list);
        Ok(())
    }

    fn write_scan_settings(&mut self, metadata: &AcquisitionMetadata) -> WriterResult {
        let mut list = bstart!("scanSettingsList");
        attrib!("count", "1", list);
        start_event!(self, list);
        let mut settings = bstart!("scanSettings");
        attrib!("id", "scanSettings1", settings);
        start_event!(self, settings);

        let max_x = metadata
            .run_table
            .iter()
            .map(|p| p.x)
            .fold(0.0, f64::max) as u64;
        let max_y = metadata
            .run_table
            .iter()
            .map(|p| p.y)
            .fold(0.0, f64::max) as u64;
        self.write_param(&ControlledVocabulary::IMS.param_val(
            "IMS:1000042",
            "max count of pixels x",
            max_x,
        ))?;
        self.write_param(&ControlledVocabulary::IMS.param_val(
            "IMS:1000043",
            "max count of pixels y",
            max_y,
        ))?;
        // The pixel size term carries the pixel area, not the edge length
        self.write_param(
            &ControlledVocabulary::IMS
                .param_val("IMS:1000046", "pixel size", metadata.pixel_area())
                .with_unit_t(&Unit::Micrometer),
        )?;

        end_event!(self, settings);
        end_event!(self, list);
        Ok(())
    }

    fn write_binary_array(
        &mut self,
        kind: ArrayKind,
        dtype: BinaryDataType,
        length: u64,
        offset: u64,
    ) -> WriterResult {
        let mut array = bstart!("binaryDataArray");
        attrib!("encodedLength", "0", array);
        start_event!(self, array);

        let mut group_ref = bstart!("referenceableParamGroupRef");
        attrib!("ref", kind.group_id(), group_ref);
        self.handle.write_event(Event::Empty(group_ref))?;

        self.write_param(&ControlledVocabulary::IMS.param_val(
            "IMS:1000103",
            "external array length",
            length,
        ))?;
        self.write_param(&ControlledVocabulary::IMS.param_val(
            "IMS:1000104",
            "external encoded length",
            length * dtype.size_of(),
        ))?;
        self.write_param(&ControlledVocabulary::IMS.param_val(
            "IMS:1000102",
            "external offset",
            offset,
        ))?;
        self.handle.write_event(Event::Empty(bstart!("binary")))?;

        end_event!(self, array);
        Ok(())
    }

    fn write_spectrum(
        &mut self,
        index: usize,
        record: &PixelRecord,
        metadata: &AcquisitionMetadata,
    ) -> WriterResult {
        let mut spectrum = bstart!("spectrum");
        let index_str = index.to_string();
        let id = format!("spectrum={index}");
        let default_length = record.mz_length.to_string();
        attrib!("index", index_str, spectrum);
        attrib!("id", id, spectrum);
        attrib!("defaultArrayLength", default_length, spectrum);
        start_event!(self, spectrum);

        let mut scan_list = bstart!("scanList");
        attrib!("count", "1", scan_list);
        start_event!(self, scan_list);
        let scan = bstart!("scan");
        start_event!(self, scan);
        self.write_param(&ControlledVocabulary::IMS.param_val(
            "IMS:1000050",
            "position x",
            record.x,
        ))?;
        self.write_param(&ControlledVocabulary::IMS.param_val(
            "IMS:1000051",
            "position y",
            record.y,
        ))?;
        end_event!(self, scan);
        end_event!(self, scan_list);

        let mut array_list = bstart!("binaryDataArrayList");
        attrib!("count", "2", array_list);
        start_event!(self, array_list);
        self.write_binary_array(
            ArrayKind::Mass,
            metadata.mz_data_type,
            record.mz_length,
            record.mz_offset,
        )?;
        self.write_binary_array(
            ArrayKind::Intensity,
            metadata.int_data_type,
            record.int_length,
            record.int_offset,
        )?;
        end_event!(self, array_list);

        end_event!(self, spectrum);
        Ok(())
    }

    fn write_run(&mut self, metadata: &AcquisitionMetadata) -> WriterResult {
        let mut run = bstart!("run");
        attrib!("id", "run0", run);
        start_event!(self, run);
        let mut spectrum_list = bstart!("spectrumList");
        let count = metadata.pixel_count().to_string();
        attrib!("count", count, spectrum_list);
        start_event!(self, spectrum_list);
        for (index, record) in metadata.run_table.iter().enumerate() {
            self.write_spectrum(index, record, metadata)?;
        }
        end_event!(self, spectrum_list);
        end_event!(self, run);
        Ok(())
    }
}

/// Serialize `metadata` into an open [`Write`] sink.
pub fn write_imzml_to<W: Write>(sink: W, metadata: &AcquisitionMetadata) -> WriterResult {
    let mut writer = ImzMLWriter::new(sink);
    writer.write(metadata)
}

/// Serialize `metadata` as an imzML document at `path`, replacing any
/// existing file.
pub fn write_imzml<P: AsRef<Path>>(path: P, metadata: &AcquisitionMetadata) -> WriterResult {
    let handle = fs::File::create(path)?;
    write_imzml_to(handle, metadata)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::io::reader::{read_imzml, read_imzml_from};

    fn example_metadata() -> AcquisitionMetadata {
        AcquisitionMetadata {
            uuid: "906C875347AE43EE8FA8F00E6E9288FA".into(),
            md5_checksum: Some("8783D5A6FA45448806D3D871B99DE3F3".into()),
            sha_checksum: None,
            continuous_mode: true,
            compression_mz: false,
            compression_int: false,
            mz_data_type: BinaryDataType::Float32,
            int_data_type: BinaryDataType::Float32,
            pixel_size_um: 5.0,
            run_table: vec![
                PixelRecord {
                    x: 1.0,
                    y: 1.0,
                    mz_length: 400,
                    mz_offset: 0,
                    int_length: 400,
                    int_offset: 400,
                },
                PixelRecord {
                    x: 2.0,
                    y: 1.0,
                    mz_length: 400,
                    mz_offset: 800,
                    int_length: 400,
                    int_offset: 1200,
                },
            ],
        }
    }

    fn render(metadata: &AcquisitionMetadata) -> String {
        let mut sink = Vec::new();
        write_imzml_to(&mut sink, metadata).expect("document should serialize");
        String::from_utf8(sink).expect("output should be UTF-8")
    }

    #[test_log::test]
    fn round_trip_in_memory() {
        let metadata = example_metadata();
        let document = render(&metadata);
        let reparsed = read_imzml_from(document.as_bytes()).expect("output should parse back");
        assert_eq!(reparsed, metadata);
    }

    #[test]
    fn round_trip_processed_with_sha() {
        let mut metadata = example_metadata();
        metadata.continuous_mode = false;
        metadata.md5_checksum = None;
        metadata.sha_checksum = Some("7BCD0A8F2DA4D1F01B4B6A99FE1396C86EE9E93A".into());
        metadata.mz_data_type = BinaryDataType::Float64;
        metadata.int_data_type = BinaryDataType::Int32;
        let document = render(&metadata);
        let reparsed = read_imzml_from(document.as_bytes()).expect("output should parse back");
        assert_eq!(reparsed, metadata);
    }

    #[test_log::test]
    fn round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acquisition.imzML");
        let metadata = example_metadata();
        write_imzml(&path, &metadata).expect("document should serialize");
        let reparsed = read_imzml(&path).expect("file should parse back");
        assert_eq!(reparsed, metadata);
    }

    #[test]
    fn document_shape() {
        let document = render(&example_metadata());
        assert!(document.starts_with(r#"<?xml version="1.0" encoding="UTF-8" standalone="no"?>"#));
        assert!(document.contains("\n\t<cvList count=\"3\">"));
        assert!(document.contains(r#"value="{906C8753-47AE-43EE-8FA8-F00E6E9288FA}""#));
        assert!(document.contains(
            r#"<cvParam accession="IMS:1000042" cvRef="IMS" name="max count of pixels x" value="2"/>"#
        ));
        assert!(document.contains(
            r#"<cvParam accession="IMS:1000043" cvRef="IMS" name="max count of pixels y" value="1"/>"#
        ));
        // 400 32-bit values take 1600 bytes
        assert!(document.contains(
            r#"<cvParam accession="IMS:1000104" cvRef="IMS" name="external encoded length" value="1600"/>"#
        ));
        assert!(crate::io::reader::is_imzml(document.as_bytes()));
    }

    #[test]
    fn invalid_uuid_is_rejected() {
        let mut metadata = example_metadata();
        metadata.uuid = "not a uuid".into();
        let err = write_imzml_to(&mut Vec::new(), &metadata).unwrap_err();
        assert!(matches!(err, ImzMLWriterError::InvalidUuid(..)));
    }
}
