//! Validated identifiers for pool entries and upstream client identities.

// std
use std::{borrow::Borrow, ops::Deref};
// self
use crate::_prelude::*;

macro_rules! def_id {
	($name:ident, $doc:literal, $kind:literal) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Creates a new identifier after validation.
			pub fn new(value: impl AsRef<str>) -> Result<Self, IdentifierError> {
				let view = value.as_ref();

				validate_view($kind, view)?;

				Ok(Self(view.to_owned()))
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &Self::Target {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				validate_view($kind, &value)?;

				Ok(Self(value))
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, concat!($kind, "({})"), self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
		impl FromStr for $name {
			type Err = IdentifierError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s)
			}
		}
	};
}

const IDENTIFIER_MAX_LEN: usize = 128;

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// Kind of identifier (credential, client).
		kind: &'static str,
	},
	/// The identifier contains whitespace characters.
	#[error("{kind} identifier contains whitespace.")]
	ContainsWhitespace {
		/// Kind of identifier (credential, client).
		kind: &'static str,
	},
	/// The identifier contains `:`, which is reserved as the store key separator.
	#[error("{kind} identifier contains the reserved `:` separator.")]
	ContainsSeparator {
		/// Kind of identifier (credential, client).
		kind: &'static str,
	},
	/// The identifier exceeded the allowed character count.
	#[error("{kind} identifier exceeds {max} characters.")]
	TooLong {
		/// Kind of identifier (credential, client).
		kind: &'static str,
		/// Maximum permitted character count.
		max: usize,
	},
}

def_id! { CredentialId, "Stable identifier of one pool entry; keys every piece of shared state.", "Credential" }
def_id! { ClientId, "Upstream client identifier sent to the token endpoint.", "Client" }

fn validate_view(kind: &'static str, view: &str) -> Result<(), IdentifierError> {
	if view.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if view.chars().any(char::is_whitespace) {
		return Err(IdentifierError::ContainsWhitespace { kind });
	}
	if kind == "Credential" && view.contains(':') {
		return Err(IdentifierError::ContainsSeparator { kind });
	}
	if view.len() > IDENTIFIER_MAX_LEN {
		return Err(IdentifierError::TooLong { kind, max: IDENTIFIER_MAX_LEN });
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn identifiers_reject_whitespace_and_empty_values() {
		assert!(CredentialId::new(" key-a").is_err(), "Leading whitespace must be rejected.");
		assert!(CredentialId::new("key-a ").is_err(), "Trailing whitespace must be rejected.");
		assert!(ClientId::new("").is_err());

		let id = CredentialId::new("key-a").expect("Credential fixture should be valid.");

		assert_eq!(id.as_ref(), "key-a");
	}

	#[test]
	fn credential_ids_reserve_the_key_separator() {
		assert_eq!(
			CredentialId::new("key:a"),
			Err(IdentifierError::ContainsSeparator { kind: "Credential" })
		);
		// Upstream client ids are opaque and never end up inside store keys.
		ClientId::new("app:42").expect("Client ids may carry colons.");
	}

	#[test]
	fn serde_round_trip_enforces_validation() {
		let id: CredentialId =
			serde_json::from_str("\"key-42\"").expect("Credential id should deserialize.");

		assert_eq!(id.as_ref(), "key-42");
		assert!(serde_json::from_str::<CredentialId>("\"with space\"").is_err());
	}

	#[test]
	fn length_limit_is_inclusive() {
		CredentialId::new("a".repeat(IDENTIFIER_MAX_LEN)).expect("Exact length should succeed.");

		assert!(CredentialId::new("a".repeat(IDENTIFIER_MAX_LEN + 1)).is_err());
	}

	#[test]
	fn borrow_supports_fast_lookup() {
		let map: HashMap<CredentialId, u8> = HashMap::from_iter([(
			CredentialId::new("key-a").expect("Credential used for lookup should be valid."),
			7_u8,
		)]);

		assert_eq!(map.get("key-a"), Some(&7));
	}
}
