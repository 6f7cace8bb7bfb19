//! Document question answering: ingest PDF, TXT and DOCX files into an
//! embedding index, then answer questions from the closest chunks with a
//! hosted chat model, citing the source files.

pub mod answer;
pub mod chunker;
pub mod config;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod loader;
pub mod logging;
pub mod models;
pub mod session;
