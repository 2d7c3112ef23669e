//! Demonstrates selecting credentials from a two-key pool against a mocked token endpoint,
//! reporting call outcomes, and printing the admin snapshot.

// std
use std::sync::Arc;
// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
use url::Url;
// self
use ocr_pool_governor::{
	auth::Credential,
	config::GovernorConfig,
	endpoint::ReqwestTokenEndpoint,
	governor::{CallOutcome, Governor},
	http::ReqwestHttpClient,
	reqwest::Client,
	store::{GovernorStore, MemoryStore},
	time::{Duration, OffsetDateTime},
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let token_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/2.0/token");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"access_token\":\"demo-access\",\"expires_in\":2592000}");
		})
		.await;
	let token_url = Url::parse(&server.url("/oauth/2.0/token"))?;
	let config = GovernorConfig::builder()
		.credential(Credential::new("demo-key-a", "secret-a")?)
		.credential(Credential::new("demo-key-b", "secret-b")?)
		.token_endpoint(token_url.clone())
		.build()?;
	let http_client = ReqwestHttpClient::with_client(
		Client::builder().timeout(std::time::Duration::from_secs(5)).build()?,
	);
	let endpoint = ReqwestTokenEndpoint::new(token_url)?.with_http_client(http_client);
	let store: Arc<dyn GovernorStore> = Arc::new(MemoryStore::new());
	let governor = Governor::new(config, store, Arc::new(endpoint))?;
	let start = OffsetDateTime::now_utc();

	for (i, outcome) in [
		CallOutcome::Succeeded,
		CallOutcome::Failed { message: "image format error".into() },
		CallOutcome::Cancelled,
	]
	.into_iter()
	.enumerate()
	{
		let now = start + Duration::seconds(i as i64);
		let selection = governor.select(now).await?;

		println!(
			"Call {i}: {} via {} (token use {}).",
			selection.credential.id,
			governor.ocr_endpoint(),
			selection.token.use_count
		);

		governor.report(&selection, outcome, now).await?;
	}

	let snapshot = governor.admin().snapshot(start + Duration::seconds(3)).await?;

	println!("{}", serde_json::to_string_pretty(&snapshot)?);

	token_mock.assert_calls_async(2).await;

	Ok(())
}
