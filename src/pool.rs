//! Immutable, ordered credential pool.

// self
use crate::{
	_prelude::*,
	auth::{Credential, CredentialEntry, CredentialId},
	error::ConfigError,
};

/// Ordered set of interchangeable credentials; cheap to clone.
#[derive(Clone, Debug)]
pub struct CredentialPool {
	credentials: Arc<[Credential]>,
	positions: Arc<HashMap<CredentialId, usize>>,
}
impl CredentialPool {
	/// Builds a pool, rejecting duplicate ids.
	pub fn new<I>(credentials: I) -> Result<Self, ConfigError>
	where
		I: IntoIterator<Item = Credential>,
	{
		let credentials = credentials.into_iter().collect::<Vec<_>>();
		let mut positions = HashMap::with_capacity(credentials.len());

		for (position, credential) in credentials.iter().enumerate() {
			if positions.insert(credential.id.clone(), position).is_some() {
				return Err(ConfigError::DuplicateCredential { id: credential.id.clone() });
			}
		}

		Ok(Self { credentials: credentials.into(), positions: Arc::new(positions) })
	}

	/// Parses a JSON array of `{"client_id", "client_secret"}` entries.
	pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
		let mut de = serde_json::Deserializer::from_str(json);
		let entries: Vec<CredentialEntry> = serde_path_to_error::deserialize(&mut de)
			.map_err(|source| ConfigError::InvalidDocument { source })?;
		let credentials = entries
			.into_iter()
			.map(CredentialEntry::into_credential)
			.collect::<Result<Vec<_>, _>>()?;

		Self::new(credentials)
	}

	/// Number of credentials.
	pub fn len(&self) -> usize {
		self.credentials.len()
	}

	/// Returns `true` when the pool is empty.
	pub fn is_empty(&self) -> bool {
		self.credentials.is_empty()
	}

	/// Credential at a round-robin position.
	pub fn at(&self, position: usize) -> Option<&Credential> {
		self.credentials.get(position)
	}

	/// Looks up a credential by id.
	pub fn get(&self, id: &CredentialId) -> Option<&Credential> {
		self.positions.get(id).and_then(|position| self.credentials.get(*position))
	}

	/// Returns `true` if the id belongs to the pool.
	pub fn contains(&self, id: &CredentialId) -> bool {
		self.positions.contains_key(id)
	}

	/// Iterates credentials in pool order.
	pub fn iter(&self) -> impl Iterator<Item = &Credential> {
		self.credentials.iter()
	}

	/// Set of configured ids, used to find orphaned state.
	pub fn ids(&self) -> HashSet<CredentialId> {
		self.positions.keys().cloned().collect()
	}
}
