pub mod ingest;

pub use ingest::{IngestOptions, InputKind, handle_ingest};
