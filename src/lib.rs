//! Bulk image downloader for Moebooru style listing APIs.

pub mod yandere;
