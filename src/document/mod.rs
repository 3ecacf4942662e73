//! Document creation for finished jobs.
//!
//! The only backend is Notion; [`NotionClient`] implements
//! [`DocumentSink`](crate::pipeline::DocumentSink).

pub mod notion;

pub use notion::{
    build_blocks, build_properties, fallback_page_url, page_body, NotionClient, NotionConfig,
    DEFAULT_NOTION_VERSION, DEFAULT_TITLE_PROP, NOTION_API_BASE,
};
