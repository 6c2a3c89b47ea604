#![deny(clippy::dbg_macro)]
//! Object store of PDF files: parse a file into its object graph, resolve
//! objects on demand, edit them, then save as a new file or append an
//! incremental update.
pub mod cursor;
pub mod file;
pub mod filter;
pub mod object;
pub mod parser;
pub mod writer;

pub use file::{
    Authorization, Cipher, Document, EncryptionOptions, FileError, FileResult, OpenOptions,
    Permissions,
};
pub use object::{Dictionary, Name, Object, ObjectId, PdfString, Stream};
pub use writer::SaveOptions;
