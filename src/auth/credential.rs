//! Pool entries pairing a stable id with the upstream client id/secret.

// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD_NO_PAD};
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	auth::{ClientId, ClientSecret, CredentialId, IdentifierError},
};

/// One upstream API credential. Immutable once the pool is built.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
	/// Pool-level identifier; defaults to the client id.
	pub id: CredentialId,
	/// Upstream client identifier.
	pub client_id: ClientId,
	/// Upstream client secret.
	pub client_secret: ClientSecret,
}
impl Credential {
	/// Builds a credential whose pool id equals the client id.
	pub fn new(
		client_id: impl AsRef<str>,
		client_secret: impl Into<String>,
	) -> Result<Self, IdentifierError> {
		let client_id = ClientId::new(client_id)?;
		let id = CredentialId::new(client_id.as_ref())?;

		Ok(Self { id, client_id, client_secret: ClientSecret::new(client_secret) })
	}

	/// Overrides the pool-level identifier.
	pub fn with_id(mut self, id: CredentialId) -> Self {
		self.id = id;

		self
	}

	/// Stable fingerprint of the client id/secret pair, safe to log.
	pub fn fingerprint(&self) -> String {
		let mut hasher = Sha256::new();

		hasher.update(self.client_id.as_bytes());
		hasher.update(b"\n");
		hasher.update(self.client_secret.expose().as_bytes());

		STANDARD_NO_PAD.encode(hasher.finalize())
	}
}
impl Debug for Credential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Credential")
			.field("id", &self.id)
			.field("client_id", &self.client_id)
			.field("client_secret", &"<redacted>")
			.finish()
	}
}

/// Serialized shape of one credential entry, e.g. `{"client_id": "...", "client_secret": "..."}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CredentialEntry {
	/// Optional pool id; falls back to the client id.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<CredentialId>,
	/// Upstream client identifier.
	pub client_id: ClientId,
	/// Upstream client secret.
	pub client_secret: ClientSecret,
}
impl CredentialEntry {
	/// Converts the entry into a [`Credential`].
	pub fn into_credential(self) -> Result<Credential, IdentifierError> {
		let id = match self.id {
			Some(id) => id,
			None => CredentialId::new(self.client_id.as_ref())?,
		};

		Ok(Credential { id, client_id: self.client_id, client_secret: self.client_secret })
	}
}
