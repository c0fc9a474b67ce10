//! Small shared helpers.
//!
//! - **URL validation**: scheme checks and the private-network guard applied to
//!   feed URLs from configuration and to image URLs found in article markup
//! - **XML text**: escaping for XHTML output, dropping characters XML forbids
//!
//! ```
//! use anthology::util::{escape_text, validate_url};
//!
//! let url = validate_url("https://example.com/feed.xml", false).unwrap();
//! assert_eq!(url.host_str(), Some("example.com"));
//! assert_eq!(escape_text("a < b"), "a &lt; b");
//! ```

mod text;
mod url_validator;

pub use text::{escape_attr, escape_text};
pub use url_validator::{check_remote_url, validate_url, UrlValidationError};
