//! Configuration module for email accounts and server settings
//!
//! Accounts come either from `EMAIL_ACCOUNTS_JSON` (a JSON object of named
//! accounts, each in the flat or nested shape) or from a single set of
//! `SMTP_*` / `IMAP_*` variables. Both shapes are resolved here into one
//! canonical [`Account`]; nothing downstream sees the raw shapes.

use std::collections::BTreeMap;
use std::env;
use std::env::VarError;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::errors::{AppError, AppResult};

const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_IMAP_PORT: u16 = 993;

/// Canonical email account
///
/// One identity for both protocols: the SMTP credentials also authenticate
/// the IMAP session. Passwords are stored using `SecretString` to prevent
/// accidental logging.
#[derive(Debug, Clone)]
pub struct Account {
    /// Account name used by the `account_name` tool parameter
    pub name: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    /// Implicit TLS for SMTP; `false` means STARTTLS on the submission port
    pub smtp_secure: bool,
    pub smtp_user: String,
    pub smtp_pass: SecretString,
    pub imap_host: String,
    pub imap_port: u16,
    /// Implicit TLS for IMAP; `false` means a plaintext session
    pub imap_secure: bool,
    /// Display name used in the From header of outgoing mail
    pub default_from_name: Option<String>,
}

impl Account {
    /// Check the fields a mailbox session needs before touching the network
    ///
    /// # Errors
    ///
    /// Returns `Config` naming the first missing field.
    pub fn ensure_session_ready(&self) -> AppResult<()> {
        let missing = if self.imap_host.trim().is_empty() {
            Some("imap_host")
        } else if self.smtp_user.trim().is_empty() {
            Some("smtp_user")
        } else if self.smtp_pass.expose_secret().trim().is_empty() {
            Some("smtp_pass")
        } else {
            None
        };
        match missing {
            Some(field) => Err(AppError::Config(format!(
                "account '{}' is missing required field {field}",
                self.name
            ))),
            None => Ok(()),
        }
    }
}

/// Server-wide configuration
///
/// Wraps all accounts and global timeouts. Shared with tool handlers via `Arc`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// All configured accounts, keyed by name
    pub accounts: BTreeMap<String, Account>,
    /// Account used when a tool call omits `account_name`
    pub default_account: String,
    /// TCP connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// IMAP greeting/TLS handshake/LOGIN timeout in milliseconds
    pub greeting_timeout_ms: u64,
    /// Per-command socket timeout in milliseconds
    pub socket_timeout_ms: u64,
    /// End-to-end budget for a message fetch in milliseconds
    pub fetch_timeout_ms: u64,
    /// End-to-end budget for a folder listing in milliseconds
    pub folder_list_timeout_ms: u64,
    /// SMTP command timeout in milliseconds
    pub smtp_timeout_ms: u64,
}

impl ServerConfig {
    /// Load all configuration from environment variables
    ///
    /// `default_override` (from the command line) wins over
    /// `DEFAULT_EMAIL_ACCOUNT`, which wins over the first configured name.
    ///
    /// # Errors
    ///
    /// Returns `Config` if `EMAIL_ACCOUNTS_JSON` is malformed, if required
    /// single-account variables are missing, or if a timeout is not numeric.
    ///
    /// # Example Environment
    ///
    /// ```text
    /// SMTP_HOST=smtp.gmail.com
    /// SMTP_USER=user@gmail.com
    /// SMTP_PASS=app-password
    /// IMAP_HOST=imap.gmail.com
    /// DEFAULT_FROM_NAME=Jane Doe
    /// ```
    pub fn load_from_env(default_override: Option<String>) -> AppResult<Self> {
        Self::load(default_override, &EnvVars::new(|key: &str| env::var(key)))
    }

    fn load<F>(default_override: Option<String>, vars: &EnvVars<F>) -> AppResult<Self>
    where
        F: Fn(&str) -> Result<String, VarError>,
    {
        let named_default = vars.optional("DEFAULT_EMAIL_ACCOUNT")?;
        let configured = match vars.optional("EMAIL_ACCOUNTS_JSON")? {
            Some(json) => parse_accounts_json(&json)?,
            None => {
                let name = named_default.clone().unwrap_or_else(|| "default".to_owned());
                vec![load_single_account(name, vars)?]
            }
        };

        let first_configured = configured.first().map(|a| a.name.clone());
        let default_account = default_override
            .filter(|n| !n.trim().is_empty())
            .or(named_default)
            .or(first_configured)
            .ok_or_else(|| AppError::Config("no email accounts configured".to_owned()))?;
        let accounts = configured
            .into_iter()
            .map(|account| (account.name.clone(), account))
            .collect();

        Ok(Self {
            accounts,
            default_account,
            connect_timeout_ms: vars.parse_u64("EMAIL_CONNECT_TIMEOUT_MS", 15_000)?,
            greeting_timeout_ms: vars.parse_u64("EMAIL_GREETING_TIMEOUT_MS", 10_000)?,
            socket_timeout_ms: vars.parse_u64("EMAIL_SOCKET_TIMEOUT_MS", 60_000)?,
            fetch_timeout_ms: vars.parse_u64("EMAIL_FETCH_TIMEOUT_MS", 90_000)?,
            folder_list_timeout_ms: vars.parse_u64("EMAIL_FOLDER_LIST_TIMEOUT_MS", 30_000)?,
            smtp_timeout_ms: vars.parse_u64("EMAIL_SMTP_TIMEOUT_MS", 60_000)?,
        })
    }

    /// Resolve an account by name, falling back to the default account
    ///
    /// # Errors
    ///
    /// Returns `Config` listing the available names if the account is unknown.
    pub fn resolve_account(&self, name: Option<&str>) -> AppResult<&Account> {
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(self.default_account.as_str());
        self.accounts.get(name).ok_or_else(|| {
            let available = self
                .accounts
                .keys()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            AppError::Config(format!(
                "account \"{name}\" not found. Available accounts: {available}"
            ))
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn greeting_timeout(&self) -> Duration {
        Duration::from_millis(self.greeting_timeout_ms)
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn folder_list_timeout(&self) -> Duration {
        Duration::from_millis(self.folder_list_timeout_ms)
    }

    pub fn smtp_timeout(&self) -> Duration {
        Duration::from_millis(self.smtp_timeout_ms)
    }
}

/// Account entry as written in `EMAIL_ACCOUNTS_JSON`
///
/// An entry with both `smtp` and `imap` objects is nested; anything else is
/// read as the flat shape.
#[derive(Debug)]
enum AccountShape {
    Nested(NestedAccount),
    Flat(FlatAccount),
}

#[derive(Debug, Deserialize)]
struct NestedAccount {
    smtp: NestedSmtp,
    imap: NestedImap,
    default_from_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NestedSmtp {
    #[serde(default)]
    host: String,
    port: Option<u16>,
    secure: Option<bool>,
    #[serde(default)]
    user: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Deserialize)]
struct NestedImap {
    #[serde(default)]
    host: String,
    port: Option<u16>,
    secure: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct FlatAccount {
    #[serde(default)]
    smtp_host: String,
    #[serde(default = "default_smtp_port")]
    smtp_port: u16,
    #[serde(default)]
    smtp_secure: bool,
    #[serde(default)]
    smtp_user: String,
    #[serde(default)]
    smtp_pass: String,
    #[serde(default)]
    imap_host: String,
    #[serde(default = "default_imap_port")]
    imap_port: u16,
    #[serde(default = "default_true")]
    imap_secure: bool,
    default_from_name: Option<String>,
}

impl AccountShape {
    fn from_value(name: &str, value: serde_json::Value) -> AppResult<Self> {
        let nested = value.get("smtp").is_some_and(serde_json::Value::is_object)
            && value.get("imap").is_some_and(serde_json::Value::is_object);
        let shape = if nested {
            serde_json::from_value(value).map(Self::Nested)
        } else {
            serde_json::from_value(value).map(Self::Flat)
        };
        shape.map_err(|e| {
            AppError::Config(format!(
                "invalid account \"{name}\" in EMAIL_ACCOUNTS_JSON: {e}"
            ))
        })
    }

    /// Resolve either shape into the canonical account
    fn into_account(self, name: String) -> Account {
        match self {
            Self::Nested(n) => {
                let smtp_port = n.smtp.port.unwrap_or(DEFAULT_SMTP_PORT);
                let imap_port = n.imap.port.unwrap_or(DEFAULT_IMAP_PORT);
                Account {
                    name,
                    smtp_host: n.smtp.host,
                    smtp_port,
                    smtp_secure: n.smtp.secure.unwrap_or(smtp_port == 465),
                    smtp_user: n.smtp.user,
                    smtp_pass: SecretString::new(n.smtp.password.into()),
                    imap_host: n.imap.host,
                    imap_port,
                    imap_secure: n.imap.secure.unwrap_or(imap_port == 993),
                    default_from_name: non_empty(n.default_from_name),
                }
            }
            Self::Flat(f) => Account {
                name,
                smtp_host: f.smtp_host,
                smtp_port: f.smtp_port,
                smtp_secure: f.smtp_secure,
                smtp_user: f.smtp_user,
                smtp_pass: SecretString::new(f.smtp_pass.into()),
                imap_host: f.imap_host,
                imap_port: f.imap_port,
                imap_secure: f.imap_secure,
                default_from_name: non_empty(f.default_from_name),
            },
        }
    }
}

/// Parse `EMAIL_ACCOUNTS_JSON` into canonical accounts, in document order
///
/// # Errors
///
/// Returns `Config` if the JSON is not an object of account objects, naming
/// the offending account when one entry fails to deserialize.
pub fn parse_accounts_json(json: &str) -> AppResult<Vec<Account>> {
    let entries: serde_json::Map<String, serde_json::Value> = serde_json::from_str(json)
        .map_err(|e| AppError::Config(format!("failed to parse EMAIL_ACCOUNTS_JSON: {e}")))?;
    if entries.is_empty() {
        return Err(AppError::Config(
            "EMAIL_ACCOUNTS_JSON does not define any accounts".to_owned(),
        ));
    }
    entries
        .into_iter()
        .map(|(name, value)| {
            let shape = AccountShape::from_value(&name, value)?;
            Ok(shape.into_account(name))
        })
        .collect()
}

/// Load the single account described by `SMTP_*` / `IMAP_*` variables
fn load_single_account<F>(name: String, vars: &EnvVars<F>) -> AppResult<Account>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    let smtp_host = vars.optional("SMTP_HOST")?.unwrap_or_default();
    let smtp_user = vars.optional("SMTP_USER")?.unwrap_or_default();
    let smtp_pass = vars.optional("SMTP_PASS")?.unwrap_or_default();
    let imap_host = vars.optional("IMAP_HOST")?.unwrap_or_default();

    let missing = [
        ("SMTP_HOST", &smtp_host),
        ("SMTP_USER", &smtp_user),
        ("SMTP_PASS", &smtp_pass),
        ("IMAP_HOST", &imap_host),
    ]
    .into_iter()
    .filter(|(_, v)| v.trim().is_empty())
    .map(|(k, _)| k)
    .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(AppError::Config(format!(
            "missing required email configuration: {}. Set EMAIL_ACCOUNTS_JSON or individual environment variables",
            missing.join(", ")
        )));
    }

    Ok(Account {
        name,
        smtp_host,
        smtp_port: vars.parse_u16("SMTP_PORT", DEFAULT_SMTP_PORT)?,
        smtp_secure: vars.parse_bool("SMTP_SECURE", false)?,
        smtp_user,
        smtp_pass: SecretString::new(smtp_pass.into()),
        imap_host,
        imap_port: vars.parse_u16("IMAP_PORT", DEFAULT_IMAP_PORT)?,
        imap_secure: vars.parse_bool("IMAP_SECURE", true)?,
        default_from_name: non_empty(vars.optional("DEFAULT_FROM_NAME")?),
    })
}

fn default_smtp_port() -> u16 {
    DEFAULT_SMTP_PORT
}

fn default_imap_port() -> u16 {
    DEFAULT_IMAP_PORT
}

fn default_true() -> bool {
    true
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Typed reads over an environment lookup
struct EnvVars<F> {
    lookup: F,
}

impl<F> EnvVars<F>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    fn new(lookup: F) -> Self {
        Self { lookup }
    }

    /// Read an optional variable, treating blank values as unset
    fn optional(&self, key: &str) -> AppResult<Option<String>> {
        match (self.lookup)(key) {
            Ok(v) if v.trim().is_empty() => Ok(None),
            Ok(v) => Ok(Some(v)),
            Err(VarError::NotPresent) => Ok(None),
            Err(VarError::NotUnicode(_)) => Err(AppError::Config(format!(
                "environment variable {key} contains non-unicode data"
            ))),
        }
    }

    /// Parse a boolean variable with flexible values
    ///
    /// Accepts: `1`, `true`, `yes`, `y`, `on` (truthy) or `0`, `false`, `no`,
    /// `n`, `off` (falsy). Case-insensitive. Returns `default` if unset.
    fn parse_bool(&self, key: &str, default: bool) -> AppResult<bool> {
        match self.optional(key)? {
            Some(v) => parse_bool_value(&v).ok_or_else(|| {
                AppError::Config(format!("invalid boolean environment variable {key}: '{v}'"))
            }),
            None => Ok(default),
        }
    }

    fn parse_u16(&self, key: &str, default: u16) -> AppResult<u16> {
        match self.optional(key)? {
            Some(v) => v.trim().parse::<u16>().map_err(|_| {
                AppError::Config(format!("invalid u16 environment variable {key}: '{v}'"))
            }),
            None => Ok(default),
        }
    }

    fn parse_u64(&self, key: &str, default: u64) -> AppResult<u64> {
        match self.optional(key)? {
            Some(v) => v.trim().parse::<u64>().map_err(|_| {
                AppError::Config(format!("invalid u64 environment variable {key}: '{v}'"))
            }),
            None => Ok(default),
        }
    }
}

fn parse_bool_value(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) fn test_account(name: &str, user: &str) -> Account {
    Account {
        name: name.to_owned(),
        smtp_host: "smtp.example.com".to_owned(),
        smtp_port: 587,
        smtp_secure: false,
        smtp_user: user.to_owned(),
        smtp_pass: SecretString::new("secret".into()),
        imap_host: "imap.example.com".to_owned(),
        imap_port: 993,
        imap_secure: true,
        default_from_name: None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::env::VarError;

    use secrecy::{ExposeSecret, SecretString};

    use super::{EnvVars, ServerConfig, parse_accounts_json, parse_bool_value, test_account};
    use crate::errors::AppError;

    const WORK_THEN_HOME: &str = r#"{
        "work": {"smtp_host": "smtp.work.com", "smtp_user": "me@work.com", "smtp_pass": "pw", "imap_host": "imap.work.com"},
        "home": {"smtp_host": "smtp.home.com", "smtp_user": "me@home.com", "smtp_pass": "pw", "imap_host": "imap.home.com"}
    }"#;

    fn load_with(
        vars: &[(&str, &str)],
        default_override: Option<&str>,
    ) -> Result<ServerConfig, AppError> {
        let vars = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<BTreeMap<_, _>>();
        let env = EnvVars::new(|key: &str| vars.get(key).cloned().ok_or(VarError::NotPresent));
        ServerConfig::load(default_override.map(str::to_owned), &env)
    }

    #[test]
    fn parse_bool_value_accepts_common_truthy_and_falsy_values() {
        for truthy in ["1", "true", "TRUE", " yes ", "Y", "on"] {
            assert_eq!(parse_bool_value(truthy), Some(true));
        }

        for falsy in ["0", "false", "FALSE", " no ", "N", "off"] {
            assert_eq!(parse_bool_value(falsy), Some(false));
        }
    }

    #[test]
    fn parse_bool_value_rejects_unrecognized_values() {
        for invalid in ["", "2", "maybe", "enabled", "disabled"] {
            assert_eq!(parse_bool_value(invalid), None);
        }
    }

    #[test]
    fn nested_shape_derives_ports_and_secure_flags() {
        let json = r#"{
            "work": {
                "smtp": { "host": "smtp.work.com", "port": 465, "user": "me@work.com", "password": "pw" },
                "imap": { "host": "imap.work.com" },
                "default_from_name": "Me At Work",
                "sender_emails": ["alias@work.com"]
            }
        }"#;
        let accounts = parse_accounts_json(json).expect("nested shape parses");
        let work = &accounts[0];
        assert_eq!(work.name, "work");
        assert_eq!(work.smtp_port, 465);
        assert!(work.smtp_secure);
        assert_eq!(work.imap_port, 993);
        assert!(work.imap_secure);
        assert_eq!(work.smtp_user, "me@work.com");
        assert_eq!(work.smtp_pass.expose_secret(), "pw");
        assert_eq!(work.default_from_name.as_deref(), Some("Me At Work"));
    }

    #[test]
    fn nested_shape_on_submission_port_is_not_implicit_tls() {
        let json = r#"{"a": {"smtp": {"host": "h", "user": "u", "password": "p"}, "imap": {"host": "i", "port": 143}}}"#;
        let accounts = parse_accounts_json(json).expect("parses");
        assert_eq!(accounts[0].smtp_port, 587);
        assert!(!accounts[0].smtp_secure);
        assert!(!accounts[0].imap_secure);
    }

    #[test]
    fn flat_shape_is_used_as_is_with_defaults() {
        let json = r#"{
            "personal": {
                "smtp_host": "smtp.example.com",
                "smtp_user": "me@example.com",
                "smtp_pass": "pw",
                "imap_host": "imap.example.com"
            }
        }"#;
        let accounts = parse_accounts_json(json).expect("flat shape parses");
        let personal = &accounts[0];
        assert_eq!(personal.name, "personal");
        assert_eq!(personal.smtp_port, 587);
        assert!(!personal.smtp_secure);
        assert_eq!(personal.imap_port, 993);
        assert!(personal.imap_secure);
        assert!(personal.default_from_name.is_none());
    }

    #[test]
    fn rejects_malformed_or_empty_account_json() {
        let err = parse_accounts_json("[1, 2]").expect_err("must fail");
        assert!(err.to_string().contains("EMAIL_ACCOUNTS_JSON"));
        let err = parse_accounts_json("{}").expect_err("must fail");
        assert!(err.to_string().contains("does not define any accounts"));
    }

    #[test]
    fn nested_account_type_error_is_reported_for_that_account() {
        let json = r#"{"work": {"smtp": {"host": "h", "port": "465", "user": "u", "password": "p"}, "imap": {"host": "i"}}}"#;
        let err = parse_accounts_json(json).expect_err("string port must fail");
        let message = err.to_string();
        assert!(matches!(err, AppError::Config(_)));
        assert!(message.contains("\"work\""), "{message}");
        assert!(!message.contains("imap_host"), "{message}");
    }

    #[test]
    fn accounts_keep_document_order() {
        let names = parse_accounts_json(WORK_THEN_HOME)
            .expect("parses")
            .into_iter()
            .map(|a| a.name)
            .collect::<Vec<_>>();
        assert_eq!(names, ["work", "home"]);
    }

    #[test]
    fn default_account_prefers_cli_then_env_then_first_configured() {
        let config = load_with(&[("EMAIL_ACCOUNTS_JSON", WORK_THEN_HOME)], None).expect("loads");
        assert_eq!(config.default_account, "work");
        assert_eq!(config.accounts.len(), 2);

        let config = load_with(
            &[
                ("EMAIL_ACCOUNTS_JSON", WORK_THEN_HOME),
                ("DEFAULT_EMAIL_ACCOUNT", "home"),
            ],
            None,
        )
        .expect("loads");
        assert_eq!(config.default_account, "home");

        let config = load_with(
            &[
                ("EMAIL_ACCOUNTS_JSON", WORK_THEN_HOME),
                ("DEFAULT_EMAIL_ACCOUNT", "home"),
            ],
            Some("work"),
        )
        .expect("loads");
        assert_eq!(config.default_account, "work");
    }

    #[test]
    fn single_account_variables_and_timeouts() {
        let config = load_with(
            &[
                ("SMTP_HOST", "smtp.example.com"),
                ("SMTP_USER", "me@example.com"),
                ("SMTP_PASS", "pw"),
                ("IMAP_HOST", "imap.example.com"),
                ("SMTP_PORT", "465"),
                ("SMTP_SECURE", "yes"),
                ("EMAIL_FETCH_TIMEOUT_MS", "5000"),
            ],
            None,
        )
        .expect("loads");
        assert_eq!(config.default_account, "default");
        let account = config.resolve_account(None).expect("default account");
        assert_eq!(account.smtp_port, 465);
        assert!(account.smtp_secure);
        assert_eq!(account.imap_port, 993);
        assert_eq!(config.fetch_timeout_ms, 5000);
        assert_eq!(config.socket_timeout_ms, 60_000);
    }

    #[test]
    fn single_account_lists_every_missing_variable() {
        let err = load_with(&[("SMTP_HOST", "smtp.example.com"), ("SMTP_PASS", " ")], None)
            .expect_err("must fail");
        let message = err.to_string();
        assert!(
            message.contains("SMTP_USER, SMTP_PASS, IMAP_HOST"),
            "{message}"
        );
        assert!(!message.contains("SMTP_HOST,"), "{message}");
    }

    #[test]
    fn session_readiness_names_the_missing_field() {
        let mut account = test_account("work", "me@work.com");
        account.ensure_session_ready().expect("complete account is ready");

        account.smtp_pass = SecretString::new("  ".into());
        let err = account.ensure_session_ready().expect_err("must fail");
        assert!(err.to_string().contains("smtp_pass"));

        account.imap_host.clear();
        let err = account.ensure_session_ready().expect_err("must fail");
        assert!(err.to_string().contains("imap_host"));
    }

    #[test]
    fn resolve_account_falls_back_to_default_and_lists_available() {
        let config = ServerConfig {
            accounts: BTreeMap::from([
                ("home".to_owned(), test_account("home", "me@home.com")),
                ("work".to_owned(), test_account("work", "me@work.com")),
            ]),
            default_account: "work".to_owned(),
            connect_timeout_ms: 1,
            greeting_timeout_ms: 1,
            socket_timeout_ms: 1,
            fetch_timeout_ms: 1,
            folder_list_timeout_ms: 1,
            smtp_timeout_ms: 1,
        };
        assert_eq!(config.resolve_account(None).expect("default").name, "work");
        assert_eq!(config.resolve_account(Some("")).expect("default").name, "work");
        assert_eq!(
            config.resolve_account(Some("home")).expect("named").name,
            "home"
        );
        let err = config.resolve_account(Some("other")).expect_err("must fail");
        assert!(err.to_string().contains("Available accounts: home, work"));
    }
}
