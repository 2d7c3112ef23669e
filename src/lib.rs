//! Credential pool governor for OCR API proxies.
//!
//! A [`governor::Governor`] picks interchangeable credentials in round-robin order, enforces
//! store-backed monthly quotas and per-second rate limits, keeps unhealthy credentials out until a
//! single probe succeeds, and deduplicates access-token refreshes across concurrent handlers and
//! processes sharing one state store.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod admin;
pub mod auth;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod governor;
pub mod health;
#[cfg(feature = "reqwest")] pub mod http;
pub mod obs;
pub mod pool;
pub mod provider;
pub mod quota;
pub mod rate_limit;
pub mod selector;
pub mod store;
pub mod token;

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap, HashSet, VecDeque},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use time;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
