//! Credential source implementations, in resolution order.

mod ambient;
mod cached_token;
mod file;
mod inline;
mod interactive;

pub use ambient::AmbientDefault;
pub use cached_token::CachedUserToken;
pub use file::ServiceAccountFile;
pub use inline::InlineServiceAccount;
pub use interactive::{InteractiveOAuth, wait_for_redirect};
