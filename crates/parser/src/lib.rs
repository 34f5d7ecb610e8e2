pub mod facts;
pub mod link_finder;
pub mod schema_org;
pub mod text;

pub use facts::extract_facts;
pub use link_finder::LinkFinder;
pub use schema_org::parse_schema_org;
pub use text::visible_text;
