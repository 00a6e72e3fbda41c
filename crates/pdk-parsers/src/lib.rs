// pdk-parsers: Provider-specific pipeline definitions to the PDK IR.
//
// Implements the parser port for GitHub Actions and Azure DevOps, plus
// auto-detection over the well-known file locations.

pub mod azure;
pub mod detect;
pub mod github;
mod schema;

pub use azure::AzureParser;
pub use detect::{default_pipeline_file, discover, load_pipeline, parser_for, SniffingParser};
pub use github::GitHubParser;
