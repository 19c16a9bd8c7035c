#![forbid(unsafe_code)]
//! Ingestion primitives for the Singer tap/target message stream.
//!
//! A tap writes one JSON object per line to stdout; a target reads them in
//! order. This crate provides:
//! - A bounded-memory, line-oriented reader (oversized lines are discarded,
//!   never buffered).
//! - A typed [`Message`] model whose required fields are checked when the
//!   message is constructed, not in downstream handlers.
//! - [`MessageIngestor`], an iterator of numbered [`LineRecord`]s that the
//!   target's dispatcher drives.

mod config;
mod error;
mod ingest;
mod line_parser;
mod message;
mod reader;

pub use config::{IngestConfig, IngestLimits};
pub use error::{ErrorClass, LineRecord, MessageError};
pub use ingest::MessageIngestor;
pub use line_parser::{LineParser, SingerLineParser};
pub use message::{
    ActivateVersionMessage, Message, MessageType, RecordMessage, SchemaMessage, StateMessage,
};
pub use reader::{BoundedLine, SyncBoundedLineReader};
