//! Auth-domain identifiers, credential secret pairs, and access token models.

pub mod credential;
pub mod id;
pub mod token;

pub use credential::*;
pub use id::*;
pub use token::{record::*, secret::*};
