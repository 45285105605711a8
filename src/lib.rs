//! A reader and writer for the metadata document of the imzML format for
//! representing mass spectrometry imaging data.
//!
//! imzML splits an imaging acquisition across two files: an XML metadata
//! document based on the mzML schema, and an external `.ibd` binary file
//! holding the actual spectral arrays. This crate deals only with the XML
//! side, extracting the acquisition description and the per-pixel table of
//! byte offsets into the binary file. It never opens the binary file itself.
//!
//! Data can be stored in two modes:
//! - **Continuous**: All spectra share the same m/z values
//! - **Processed**: Each spectrum has its own m/z and intensity arrays
//!
//! Only uncompressed, externally stored arrays are supported.
//!
//! See: <https://www.ms-imaging.org/imzml/>

pub mod io;
pub mod meta;
pub mod params;

pub use crate::io::reader::{is_imzml, read_imzml, read_imzml_from, ImzMLParserError};
pub use crate::io::writer::{write_imzml, write_imzml_to, ImzMLWriter, ImzMLWriterError};

pub use crate::meta::{AcquisitionMetadata, ArrayKind, BinaryDataType, PixelRecord};
