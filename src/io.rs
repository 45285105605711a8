pub mod reader;
pub mod writer;

pub use reader::{is_imzml, read_imzml, read_imzml_from, ImzMLParserError};
pub use writer::{write_imzml, write_imzml_to, ImzMLWriter, ImzMLWriterError};
