//! Librarian Console - client library for the Data Librarian backend
//!
//! Talks to the backend that indexes the card catalog and runs the
//! duplicate-weeding and file-segmenting jobs. Catalog and configuration
//! reads go through a local cache that survives restarts, so repeated
//! lookups skip the network.

pub mod api;
pub mod cache;
