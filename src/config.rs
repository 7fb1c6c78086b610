use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use url::Url;

use crate::{
    auth::{
        AdminLogin, UserLogin, DEFAULT_ADMIN_COOKIE, DEFAULT_ADMIN_LOGIN_PATH,
        DEFAULT_CAPTCHA_PATH, DEFAULT_USER_LOGIN_PATH,
    },
    env::{expand_optional, expand_variables, load_env_file, EnvMap},
    evaluator::Strictness,
    executor::DEFAULT_TIMEOUT,
    suite::Placeholders,
};

pub const CONFIG_FILE: &str = "smokepit.json";
pub const DEFAULT_BASE_URL: &str = "http://localhost:5000";

fn resolve_relative(base: &Path, value: &str) -> PathBuf {
    let candidate = Path::new(value);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    }
}

/// Accepts `"123"` as well as `123` for identifiers.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Text(String),
    Number(u64),
}

impl Scalar {
    fn as_text(&self) -> String {
        match self {
            Scalar::Text(text) => text.clone(),
            Scalar::Number(number) => number.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct UserIdentityConfig {
    pub login_path: Option<String>,
    pub telegram_id: Option<Scalar>,
    pub first_name: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct AdminIdentityConfig {
    pub captcha_path: Option<String>,
    pub login_path: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub captcha: Option<String>,
    pub cookie_name: Option<String>,
}

/// Settings that may appear at the top level and inside a profile.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct TargetConfig {
    pub env: Option<String>,
    pub base_url: Option<String>,
    pub insecure: Option<bool>,
    pub strictness: Option<Strictness>,
    pub timeout_secs: Option<u64>,
    pub suite: Option<String>,
    pub variables: HashMap<String, String>,
    pub placeholders: HashMap<String, String>,
    pub user: UserIdentityConfig,
    pub admin: AdminIdentityConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct SmokepitConfig {
    #[serde(flatten)]
    pub defaults: TargetConfig,
    pub profiles: HashMap<String, TargetConfig>,
    pub default_profile: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: SmokepitConfig,
    pub path: PathBuf,
    pub dir: PathBuf,
}

/// Loads `smokepit.json` from a directory, or the given file. A missing file
/// is not an error.
pub fn load_config(target: &Path) -> Result<Option<LoadedConfig>> {
    let resolved = if target.is_absolute() {
        target.to_path_buf()
    } else {
        std::env::current_dir()?.join(target)
    };

    let (file_path, dir) = if resolved.is_dir() {
        (resolved.join(CONFIG_FILE), resolved)
    } else {
        let dir = match resolved.parent() {
            Some(parent) => parent.to_path_buf(),
            None => std::env::current_dir()?,
        };
        (resolved, dir)
    };

    if !file_path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(&file_path)
        .with_context(|| format!("reading config {}", file_path.display()))?;
    let config: SmokepitConfig = serde_json::from_str(&contents)
        .with_context(|| format!("parsing config {}", file_path.display()))?;

    tracing::debug!(path = %file_path.display(), "loaded config");
    Ok(Some(LoadedConfig {
        config,
        path: file_path,
        dir,
    }))
}

/// Values given on the command line or through `SMOKEPIT_*` variables. They
/// win over everything in the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub base_url: Option<String>,
    pub insecure: Option<bool>,
    pub strictness: Option<Strictness>,
    pub timeout_secs: Option<u64>,
    pub suite: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    pub placeholders: Vec<(String, String)>,
    pub telegram_id: Option<String>,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub base_url: Url,
    pub insecure: bool,
    pub strictness: Strictness,
    pub timeout: Duration,
    pub suite_path: Option<PathBuf>,
    pub placeholders: Placeholders,
    pub user_login: Option<UserLogin>,
    pub admin_login: Option<AdminLogin>,
    pub admin_cookie: String,
    pub profile_name: Option<String>,
    pub env_files: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SettingsBuilder {
    config_dir: PathBuf,
    config: Option<LoadedConfig>,
    requested_profile: Option<String>,
    overrides: Overrides,
}

impl SettingsBuilder {
    pub fn new(
        config_dir: PathBuf,
        config: Option<LoadedConfig>,
        requested_profile: Option<String>,
        overrides: Overrides,
    ) -> Self {
        Self {
            config_dir,
            config,
            requested_profile,
            overrides,
        }
    }

    pub fn build(&self) -> Result<RunSettings> {
        let empty = TargetConfig::default();
        let (root, profile, profile_name) = match &self.config {
            Some(loaded) => {
                let resolved =
                    resolve_profile(&loaded.config, self.requested_profile.as_deref())?;
                let name = resolved.as_ref().map(|p| p.name.clone());
                let profile = resolved.map(|p| p.config).unwrap_or(&empty);
                (&loaded.config.defaults, profile, name)
            }
            None => {
                if let Some(name) = &self.requested_profile {
                    bail!("Unknown profile: {} (no {} found)", name, CONFIG_FILE);
                }
                (&empty, &empty, None)
            }
        };
        let dir = self
            .config
            .as_ref()
            .map(|c| c.dir.as_path())
            .unwrap_or(self.config_dir.as_path());

        let mut vars: EnvMap = HashMap::new();
        vars.extend(root.variables.clone());
        vars.extend(profile.variables.clone());

        let mut env_files = Vec::new();
        let env_path = match &self.overrides.env_file {
            Some(explicit) => Some(explicit.clone()),
            None => profile
                .env
                .as_deref()
                .or(root.env.as_deref())
                .map(|value| resolve_relative(dir, value)),
        };
        if let Some(path) = env_path {
            env_files.push(load_env_file(&path, &mut vars)?);
        }

        let base_url = self.resolve_base_url(root, profile, &vars)?;
        let timeout_secs = self
            .overrides
            .timeout_secs
            .or(profile.timeout_secs)
            .or(root.timeout_secs);
        let timeout = match timeout_secs {
            Some(0) => bail!("timeout must be at least one second"),
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_TIMEOUT,
        };

        let suite_path = match &self.overrides.suite {
            Some(path) => Some(path.clone()),
            None => expand_optional(profile.suite.as_deref().or(root.suite.as_deref()), &vars)?
                .map(|value| resolve_relative(dir, &value)),
        };

        let user_login = self.resolve_user(root, profile, &vars)?;
        let admin_login = self.resolve_admin(root, profile, &vars)?;
        let admin_cookie = expand_optional(
            profile
                .admin
                .cookie_name
                .as_deref()
                .or(root.admin.cookie_name.as_deref()),
            &vars,
        )?
        .unwrap_or_else(|| DEFAULT_ADMIN_COOKIE.to_string());

        let mut placeholders: Placeholders = [
            ("id".to_string(), "18".to_string()),
            ("filename".to_string(), "test_image.jpg".to_string()),
        ]
        .into_iter()
        .collect();
        if let Some(login) = &user_login {
            placeholders.insert("telegram_id".to_string(), login.telegram_id.clone());
        }
        for (key, value) in root.placeholders.iter().chain(profile.placeholders.iter()) {
            placeholders.insert(key.clone(), expand_variables(value, &vars)?);
        }
        placeholders.extend(self.overrides.placeholders.iter().cloned());

        Ok(RunSettings {
            base_url,
            insecure: self
                .overrides
                .insecure
                .or(profile.insecure)
                .or(root.insecure)
                .unwrap_or(false),
            strictness: self
                .overrides
                .strictness
                .or(profile.strictness)
                .or(root.strictness)
                .unwrap_or_default(),
            timeout,
            suite_path,
            placeholders,
            user_login,
            admin_login,
            admin_cookie,
            profile_name,
            env_files,
        })
    }

    fn resolve_base_url(
        &self,
        root: &TargetConfig,
        profile: &TargetConfig,
        vars: &EnvMap,
    ) -> Result<Url> {
        let raw = match &self.overrides.base_url {
            Some(value) => value.clone(),
            None => expand_optional(
                profile.base_url.as_deref().or(root.base_url.as_deref()),
                vars,
            )?
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        };
        let url = Url::parse(raw.trim()).with_context(|| format!("invalid base URL {raw}"))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("base URL must use http or https: {}", url);
        }
        if url.query().is_some() || url.fragment().is_some() {
            bail!("base URL must not carry a query or fragment: {}", url);
        }
        Ok(url)
    }

    fn resolve_user(
        &self,
        root: &TargetConfig,
        profile: &TargetConfig,
        vars: &EnvMap,
    ) -> Result<Option<UserLogin>> {
        let (top, base) = (&profile.user, &root.user);
        let configured_id = top
            .telegram_id
            .as_ref()
            .or(base.telegram_id.as_ref())
            .map(Scalar::as_text);
        let telegram_id = match &self.overrides.telegram_id {
            Some(id) => Some(id.clone()).filter(|id| !id.trim().is_empty()),
            None => expand_optional(configured_id.as_deref(), vars)?,
        };
        let Some(telegram_id) = telegram_id else {
            return Ok(None);
        };

        let field = |top: &Option<String>, base: &Option<String>, default: &str| -> Result<String> {
            Ok(expand_optional(top.as_deref().or(base.as_deref()), vars)?
                .unwrap_or_else(|| default.to_string()))
        };
        Ok(Some(UserLogin {
            path: field(&top.login_path, &base.login_path, DEFAULT_USER_LOGIN_PATH)?,
            telegram_id,
            first_name: field(&top.first_name, &base.first_name, "Test User")?,
            username: field(&top.username, &base.username, "test_user")?,
        }))
    }

    fn resolve_admin(
        &self,
        root: &TargetConfig,
        profile: &TargetConfig,
        vars: &EnvMap,
    ) -> Result<Option<AdminLogin>> {
        let (top, base) = (&profile.admin, &root.admin);
        let field = |top: &Option<String>, base: &Option<String>| -> Result<Option<String>> {
            expand_optional(top.as_deref().or(base.as_deref()), vars)
        };

        let email = match &self.overrides.admin_email {
            Some(email) => Some(email.clone()),
            None => field(&top.email, &base.email)?,
        };
        let password = match &self.overrides.admin_password {
            Some(password) => Some(password.clone()),
            None => field(&top.password, &base.password)?,
        };
        let (email, password) = match (email, password) {
            (Some(email), Some(password)) => (email, password),
            (None, None) => return Ok(None),
            _ => {
                tracing::warn!("admin email and password must both be set; admin login disabled");
                return Ok(None);
            }
        };

        Ok(Some(AdminLogin {
            captcha_path: field(&top.captcha_path, &base.captcha_path)?
                .unwrap_or_else(|| DEFAULT_CAPTCHA_PATH.to_string()),
            login_path: field(&top.login_path, &base.login_path)?
                .unwrap_or_else(|| DEFAULT_ADMIN_LOGIN_PATH.to_string()),
            email,
            password,
            captcha_answer: field(&top.captcha, &base.captcha)?
                .unwrap_or_else(|| "test".to_string()),
            cookie_name: field(&top.cookie_name, &base.cookie_name)?
                .unwrap_or_else(|| DEFAULT_ADMIN_COOKIE.to_string()),
        }))
    }
}

struct ResolvedProfile<'a> {
    name: String,
    config: &'a TargetConfig,
}

fn resolve_profile<'a>(
    config: &'a SmokepitConfig,
    requested: Option<&str>,
) -> Result<Option<ResolvedProfile<'a>>> {
    if let Some(name) = requested {
        return match config.profiles.get(name) {
            Some(profile) => Ok(Some(ResolvedProfile {
                name: name.to_string(),
                config: profile,
            })),
            None => bail!("Unknown profile: {}", name),
        };
    }

    if let Some(default) = &config.default_profile {
        return match config.profiles.get(default) {
            Some(profile) => Ok(Some(ResolvedProfile {
                name: default.clone(),
                config: profile,
            })),
            None => bail!("defaultProfile {} is not defined", default),
        };
    }

    Ok(None)
}
