//! Account profile and environment lookups.

// self
use super::decode;
use crate::{
	_prelude::*,
	pipeline::{HttpPipeline, RequestOptions},
};

const ME_PATH: &str = "/accounts/api/me";

/// Organization reference attached to a profile.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
	/// Organization identifier.
	pub id: String,
	/// Display name.
	#[serde(default)]
	pub name: Option<String>,
}

/// Signed-in user as reported by the accounts API.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
	/// User identifier.
	pub id: String,
	/// Login name.
	pub username: String,
	/// Given name.
	#[serde(default)]
	pub first_name: Option<String>,
	/// Family name.
	#[serde(default)]
	pub last_name: Option<String>,
	/// Contact email.
	#[serde(default)]
	pub email: Option<String>,
	/// Root organization of the user.
	#[serde(default)]
	pub organization: Option<Organization>,
}

/// Deployment environment inside an organization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
	/// Environment identifier.
	pub id: String,
	/// Display name.
	pub name: String,
	/// Whether the environment is flagged as production.
	#[serde(default)]
	pub is_production: bool,
	/// Environment kind such as `sandbox` or `production`.
	#[serde(default, rename = "type")]
	pub kind: Option<String>,
}

#[derive(Deserialize)]
struct MeEnvelope {
	user: UserProfile,
}

#[derive(Deserialize)]
struct EnvironmentList {
	#[serde(default)]
	data: Vec<Environment>,
}

/// Accounts API client.
#[derive(Clone, Debug)]
pub struct AccountClient {
	pipeline: Arc<HttpPipeline>,
}
impl AccountClient {
	/// Wraps a shared pipeline.
	pub fn new(pipeline: Arc<HttpPipeline>) -> Self {
		Self { pipeline }
	}

	/// Profile of the signed-in user; served from the read cache when fresh.
	pub async fn me(&self) -> Result<UserProfile> {
		let value = self.pipeline.get_cached(ME_PATH, RequestOptions::new(), None).await?;

		Ok(decode::<MeEnvelope>(value)?.user)
	}

	/// Environments of `organization_id`.
	pub async fn environments(&self, organization_id: &str) -> Result<Vec<Environment>> {
		let path = format!("/accounts/api/organizations/{organization_id}/environments");
		let value = self.pipeline.get_cached(&path, RequestOptions::new(), None).await?;

		Ok(decode::<EnvironmentList>(value)?.data)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn profile_tolerates_missing_optional_fields() {
		let envelope: MeEnvelope = serde_json::from_value(serde_json::json!({
			"user": { "id": "u-1", "username": "dev", "organization": { "id": "org-1" } },
			"access": []
		}))
		.expect("Profile fixture should decode.");

		assert_eq!(envelope.user.username, "dev");
		assert_eq!(envelope.user.organization.map(|o| o.id).as_deref(), Some("org-1"));
		assert!(envelope.user.email.is_none());
	}

	#[test]
	fn environment_type_maps_to_kind() {
		let list: EnvironmentList = serde_json::from_value(serde_json::json!({
			"data": [{ "id": "e-1", "name": "Sandbox", "type": "sandbox" }],
			"total": 1
		}))
		.expect("Environment fixture should decode.");

		assert_eq!(list.data[0].kind.as_deref(), Some("sandbox"));
		assert!(!list.data[0].is_production);
	}
}
