use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;
use tracing::debug;

use crate::args::BaseArgs;
use crate::auth::{
    encode_pasted, LoginAttempt, LoginCoordinator, LoginOptions, ListenerConfig, SystemBrowser,
    TerminalLineReader, TerminalNotifier, DEFAULT_CALLBACK_PORT, DEFAULT_LOGIN_TIMEOUT,
};
use crate::config::{self, Config};
use crate::store::FileCredentialStore;
use crate::target::{resolve_origin, AppStateResolver, Target};
use crate::ui::{print_command_status, CommandStatus};

const DEFAULT_ENV_NAME: &str = "dev";

#[derive(Debug, Clone, Args)]
pub struct LoginArgs {
    /// App id to log in to
    pub app_id: String,

    /// Backend environment name
    #[arg(long, env = "STUDIO_LOGIN_ENV_NAME")]
    pub env_name: Option<String>,

    /// Region hosting the app (skips the app lookup)
    #[arg(long, env = "STUDIO_LOGIN_REGION")]
    pub region: Option<String>,

    /// Admin UI origin to use instead of the region default
    #[arg(long, env = "STUDIO_LOGIN_ADMINUI_BASE_URL", hide_env_values = true)]
    pub origin_url: Option<String>,

    /// Local port the browser delivers tokens to
    #[arg(long, env = "STUDIO_LOGIN_PORT")]
    pub port: Option<u16>,

    /// Print the login link instead of opening a browser
    #[arg(long)]
    pub no_browser: bool,

    /// Give up after this many seconds (0 waits indefinitely)
    #[arg(long, env = "STUDIO_LOGIN_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Args)]
pub struct StatusArgs {
    /// App id whose stored credentials to show
    pub app_id: String,

    /// Show full tokens (default: masked)
    #[arg(long)]
    pub show: bool,

    /// Print the stored record in the form `login` accepts as a pasted token
    #[arg(long, conflicts_with = "show")]
    pub paste_token: bool,
}

#[derive(Debug, Clone, Args)]
pub struct LogoutArgs {
    /// App id whose stored credentials to remove
    pub app_id: String,
}

/// Login inputs after applying flags/env over the config file over defaults.
#[derive(Debug)]
struct LoginSettings {
    env_name: String,
    region: Option<String>,
    origin_url: Option<String>,
    options: LoginOptions,
}

impl LoginSettings {
    fn resolve(args: &LoginArgs, cfg: &Config) -> Self {
        let timeout = match args.timeout_secs.or(cfg.timeout_secs) {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => Some(DEFAULT_LOGIN_TIMEOUT),
        };

        Self {
            env_name: args
                .env_name
                .clone()
                .or_else(|| cfg.env_name.clone())
                .unwrap_or_else(|| DEFAULT_ENV_NAME.to_string()),
            region: args.region.clone().or_else(|| cfg.region.clone()),
            origin_url: args.origin_url.clone().or_else(|| cfg.origin_url.clone()),
            options: LoginOptions {
                listener: ListenerConfig {
                    port: args.port.or(cfg.port).unwrap_or(DEFAULT_CALLBACK_PORT),
                    ..ListenerConfig::default()
                },
                timeout,
                open_browser: !args.no_browser,
            },
        }
    }
}

pub async fn run_login(_base: BaseArgs, args: LoginArgs) -> Result<()> {
    let cfg = config::load_global().unwrap_or_default();
    let settings = LoginSettings::resolve(&args, &cfg);

    let target = match &settings.region {
        Some(region) => Target {
            region: region.clone(),
            origin_url: resolve_origin(region, settings.origin_url.as_deref())?,
        },
        None => AppStateResolver::new(settings.origin_url.clone())
            .resolve(&args.app_id)
            .await?,
    };

    let attempt = LoginAttempt {
        app_id: args.app_id,
        env_name: settings.env_name,
        region: target.region,
        origin_url: target.origin_url,
    };

    let store = FileCredentialStore::default_location()?;
    let mut coordinator = LoginCoordinator::new(
        Arc::new(SystemBrowser),
        Arc::new(TerminalNotifier),
        Arc::new(store),
        Arc::new(TerminalLineReader),
        settings.options,
    );
    let result = coordinator.run(&attempt).await;
    debug!(
        state = ?coordinator.state(),
        listener = ?coordinator.listener_state(),
        listener_stops = coordinator.listener_stops(),
        "login finished"
    );
    result?;
    Ok(())
}

#[derive(Serialize)]
struct StatusOutput {
    app_id: String,
    access_token: String,
    expires_at: Option<DateTime<Utc>>,
    ttl_seconds: Option<i64>,
    stored_at: DateTime<Utc>,
}

pub fn run_status(base: BaseArgs, args: StatusArgs) -> Result<()> {
    let store = FileCredentialStore::default_location()?;
    let stored = store
        .load(&args.app_id)
        .with_context(|| format!("failed to read {}", store.path().display()))?
        .ok_or_else(|| {
            anyhow!(
                "No credentials stored for app '{}'. Run `studio-login login {}`",
                args.app_id,
                args.app_id
            )
        })?;

    if args.paste_token {
        println!("{}", encode_pasted(&stored.payload)?);
        return Ok(());
    }

    let token = if args.show {
        stored.payload.access_token.clone()
    } else {
        mask_token(&stored.payload.access_token)
    };
    let expires_at = stored.payload.expires_at_utc();

    if base.json {
        let output = StatusOutput {
            app_id: args.app_id,
            access_token: token,
            expires_at,
            ttl_seconds: expires_at.map(|exp| (exp - Utc::now()).num_seconds()),
            stored_at: stored.stored_at,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("App: {}", args.app_id);
    println!("Token: {token}");
    match expires_at {
        Some(exp) => {
            let ttl = exp - Utc::now();
            if ttl.num_seconds() > 0 {
                println!("Expires: {exp} (in {} seconds)", ttl.num_seconds());
            } else {
                println!("Expires: {exp} (EXPIRED)");
            }
        }
        None => println!("Expires: unknown"),
    }
    println!("Stored: {}", stored.stored_at);
    Ok(())
}

pub fn run_logout(_base: BaseArgs, args: LogoutArgs) -> Result<()> {
    let store = FileCredentialStore::default_location()?;
    if store.remove(&args.app_id)? {
        print_command_status(
            CommandStatus::Success,
            &format!("Logged out of app '{}'", args.app_id),
        );
    } else {
        print_command_status(
            CommandStatus::Info,
            &format!("No credentials stored for app '{}' (already logged out)", args.app_id),
        );
    }
    Ok(())
}

fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return "***".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(app_id: &str) -> LoginArgs {
        LoginArgs {
            app_id: app_id.to_string(),
            env_name: None,
            region: None,
            origin_url: None,
            port: None,
            no_browser: false,
            timeout_secs: None,
        }
    }

    #[test]
    fn defaults_without_flags_or_config() {
        let settings = LoginSettings::resolve(&args("app"), &Config::default());
        assert_eq!(settings.env_name, "dev");
        assert_eq!(settings.region, None);
        assert_eq!(settings.origin_url, None);
        assert_eq!(settings.options.listener.port, DEFAULT_CALLBACK_PORT);
        assert_eq!(settings.options.timeout, Some(DEFAULT_LOGIN_TIMEOUT));
        assert!(settings.options.open_browser);
    }

    #[test]
    fn config_fills_missing_flags() {
        let cfg = Config {
            env_name: Some("staging".into()),
            region: Some("eu-west-1".into()),
            origin_url: Some("http://localhost:3000".into()),
            port: Some(5000),
            timeout_secs: Some(30),
            ..Default::default()
        };
        let settings = LoginSettings::resolve(&args("app"), &cfg);
        assert_eq!(settings.env_name, "staging");
        assert_eq!(settings.region.as_deref(), Some("eu-west-1"));
        assert_eq!(settings.origin_url.as_deref(), Some("http://localhost:3000"));
        assert_eq!(settings.options.listener.port, 5000);
        assert_eq!(settings.options.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn flags_win_over_config() {
        let cfg = Config {
            env_name: Some("staging".into()),
            port: Some(5000),
            timeout_secs: Some(30),
            ..Default::default()
        };
        let mut login = args("app");
        login.env_name = Some("prod".into());
        login.port = Some(6000);
        login.timeout_secs = Some(0);
        login.no_browser = true;

        let settings = LoginSettings::resolve(&login, &cfg);
        assert_eq!(settings.env_name, "prod");
        assert_eq!(settings.options.listener.port, 6000);
        assert_eq!(settings.options.timeout, None);
        assert!(!settings.options.open_browser);
    }

    #[test]
    fn test_mask_token_long() {
        assert_eq!(mask_token("eyJ1234567890abcdef"), "eyJ1...cdef");
    }

    #[test]
    fn test_mask_token_short() {
        assert_eq!(mask_token("short"), "***");
        assert_eq!(mask_token("12345678"), "***");
    }

    #[test]
    fn test_mask_token_multibyte() {
        assert_eq!(mask_token("ééééééééé"), "éééé...éééé");
    }
}
