use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Region the app-state lookup starts from.
pub const HOME_REGION: &str = "us-east-1";

pub const SUPPORTED_REGIONS: &[&str] = &[
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-south-1",
    "ap-southeast-1",
    "ap-southeast-2",
    "ca-central-1",
    "eu-central-1",
    "eu-north-1",
    "eu-west-1",
    "eu-west-2",
    "eu-west-3",
    "me-south-1",
    "sa-east-1",
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
];

/// Where the admin UI for an app lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub region: String,
    pub origin_url: String,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("unsupported region: {0}")]
    UnsupportedRegion(String),

    #[error("Amplify Studio is not enabled for appId: {0}")]
    NotEnabled(String),

    #[error("failed to look up app {app_id}: {message}")]
    Lookup { app_id: String, message: String },
}

pub fn admin_ui_url(region: &str) -> Result<String, ResolveError> {
    ensure_supported(region)?;
    Ok(format!("https://{region}.admin.amplifyapp.com"))
}

pub fn app_state_url(region: &str) -> Result<String, ResolveError> {
    ensure_supported(region)?;
    Ok(format!("https://prod.{region}.appstate.amplifyapp.com"))
}

fn ensure_supported(region: &str) -> Result<(), ResolveError> {
    if SUPPORTED_REGIONS.contains(&region) {
        Ok(())
    } else {
        Err(ResolveError::UnsupportedRegion(region.to_string()))
    }
}

/// Origin of the admin UI: an explicit override beats the region default.
pub fn resolve_origin(region: &str, override_url: Option<&str>) -> Result<String, ResolveError> {
    match override_url.map(str::trim).filter(|url| !url.is_empty()) {
        Some(url) => Ok(url.trim_end_matches('/').to_string()),
        None => admin_ui_url(region),
    }
}

pub fn build_login_url(origin_url: &str, app_id: &str, env_name: &str) -> String {
    format!(
        "{}/admin/{}/{}/verify/",
        origin_url.trim_end_matches('/'),
        urlencoding::encode(app_id),
        urlencoding::encode(env_name)
    )
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppState {
    #[serde(default)]
    app_id: Option<String>,
    #[serde(default)]
    region: Option<String>,
}

/// Looks up which region hosts an app's admin UI.
pub struct AppStateResolver {
    client: reqwest::Client,
    origin_override: Option<String>,
}

impl AppStateResolver {
    pub fn new(origin_override: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            origin_override,
        }
    }

    pub async fn resolve(&self, app_id: &str) -> Result<Target, ResolveError> {
        let mut state = self.fetch(app_id, HOME_REGION).await?;
        if let Some(region) = state.region.clone().filter(|r| r != HOME_REGION) {
            if state.app_id.is_some() {
                state = self.fetch(app_id, &region).await?;
            }
        }

        if state.app_id.is_none() {
            return Err(ResolveError::NotEnabled(app_id.to_string()));
        }
        let region = state
            .region
            .ok_or_else(|| ResolveError::NotEnabled(app_id.to_string()))?;

        let origin_url = resolve_origin(&region, self.origin_override.as_deref())?;
        Ok(Target { region, origin_url })
    }

    async fn fetch(&self, app_id: &str, region: &str) -> Result<AppState, ResolveError> {
        let url = format!(
            "{}/AppState/?appId={}",
            app_state_url(region)?,
            urlencoding::encode(app_id)
        );
        debug!(%url, "looking up app state");

        let lookup_error = |message: String| ResolveError::Lookup {
            app_id: app_id.to_string(),
            message,
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| lookup_error(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(AppState::default());
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(lookup_error(format!("{status}: {body}")));
        }

        response
            .json::<AppState>()
            .await
            .map_err(|e| lookup_error(format!("invalid app state response: {e}")))
    }
}
