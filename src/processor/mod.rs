//! Background-style jobs that derive data from stored CRM rows.

pub mod embeddings;
