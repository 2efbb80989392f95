pub mod filename;
pub mod writer;

pub use filename::{default_file_name, ensure_pdf_extension, resolve_output_path, sanitize_filename};
pub use writer::{ExportError, write_document};
