use std::env;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::{Error, Result};
use crate::storage::bucket::{validate_part_size, DEFAULT_PART_SIZE};

/// 4000 MiB, the block-blob limit.
pub const MAX_PART_SIZE: u64 = 4000 * 1024 * 1024;

const ACCOUNT_ENV: &str = "AZURE_STORAGE_ACCOUNT";
const KEY_ENV: &str = "AZURE_STORAGE_KEY";
const SAS_TOKEN_ENV: &str = "AZURE_STORAGE_SAS_TOKEN";
const CONNECTION_STRING_ENV: &str = "AZURE_STORAGE_CONNECTION_STRING";

const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";

/// The kind of access the caller intends; write access needs extra SAS
/// permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
}

fn sas_attribute_name(key: &str) -> &'static str {
    match key {
        "sv" => "Signed Version",
        "ss" => "Signed Services",
        "srt" => "Signed Resource Types",
        "sr" => "Signed Resource",
        "sp" => "Signed Permissions",
        "se" => "Expiration Time",
        "st" => "Start Time",
        "spr" => "Signed Protocols",
        "sig" => "Signature",
        _ => "Unknown",
    }
}

fn sas_permission_name(permission: char) -> &'static str {
    match permission {
        'r' => "Read",
        'l' => "List",
        'w' => "Write",
        'c' => "Create",
        _ => "Unknown",
    }
}

/// Raw Azure options as supplied by the caller's option map.
#[derive(Debug, Clone)]
pub struct AzureOptions {
    pub container_name: String,
    pub account: Option<String>,
    pub key: Option<String>,
    pub sas_token: Option<String>,
    pub connection_string: Option<String>,
    pub endpoint_protocol: Option<String>,
    pub endpoint_suffix: Option<String>,
    pub config_file: Option<String>,
    pub part_size: Option<u64>,
    pub connect_timeout: Option<Duration>,
    pub operation: Operation,
    /// Disables the `AZURE_STORAGE_*` environment fallback, used by tests.
    pub enable_env_vars: bool,
}

impl Default for AzureOptions {
    fn default() -> Self {
        Self {
            container_name: String::new(),
            account: None,
            key: None,
            sas_token: None,
            connection_string: None,
            endpoint_protocol: None,
            endpoint_suffix: None,
            config_file: None,
            part_size: None,
            connect_timeout: None,
            operation: Operation::Read,
            enable_env_vars: true,
        }
    }
}

/// Validated, immutable Azure Blob Storage target description.
#[derive(Debug)]
pub struct AzureConfig {
    pub container_name: String,
    pub account_name: String,
    pub account_key: Option<String>,
    /// Query-string form, without a leading `?`.
    pub sas_token: Option<String>,
    pub endpoint: String,
    pub part_size: u64,
    pub connect_timeout: Option<Duration>,
    pub operation: Operation,
}

impl AzureConfig {
    pub fn new(options: AzureOptions) -> Result<Arc<Self>> {
        let mut resolved = Resolved {
            account_name: options.account.unwrap_or_default(),
            account_key: options.key.unwrap_or_default(),
            sas_token: options.sas_token.unwrap_or_default(),
            sas_token_source: "the 'azureStorageSasToken' option".to_string(),
            endpoint: String::new(),
            endpoint_protocol: options.endpoint_protocol.unwrap_or_default(),
            endpoint_suffix: options.endpoint_suffix.unwrap_or_default(),
        };

        if let Some(connection_string) = &options.connection_string {
            resolved.load_connection_string(connection_string);
        }

        if options.enable_env_vars {
            resolved.load_env_vars();
        }

        if resolved.endpoint_protocol.is_empty() {
            resolved.endpoint_protocol = "https".to_string();
        }

        if resolved.endpoint.is_empty() {
            let suffix = if resolved.endpoint_suffix.is_empty() {
                DEFAULT_ENDPOINT_SUFFIX
            } else {
                &resolved.endpoint_suffix
            };
            resolved.endpoint = format!(
                "{}://{}.blob.{suffix}",
                resolved.endpoint_protocol, resolved.account_name
            );
        }

        let part_size = options.part_size.unwrap_or(DEFAULT_PART_SIZE);
        validate_part_size(part_size, MAX_PART_SIZE)?;

        let config = Self {
            container_name: options.container_name,
            account_name: resolved.account_name,
            account_key: (!resolved.account_key.is_empty()).then_some(resolved.account_key),
            sas_token: (!resolved.sas_token.is_empty())
                .then_some(resolved.sas_token.trim_start_matches('?').to_string()),
            endpoint: resolved.endpoint,
            part_size,
            connect_timeout: options.connect_timeout,
            operation: options.operation,
        };

        config.validate(&resolved.sas_token_source)?;

        Ok(Arc::new(config))
    }

    pub fn describe(&self) -> String {
        format!("Azure Container={}", self.container_name)
    }

    fn validate(&self, sas_token_source: &str) -> Result<()> {
        if self.account_name.is_empty() {
            return Err(Error::Validation(
                "The Azure Storage Account is not defined.".to_string(),
            ));
        }

        if self.account_name.len() < 3 || self.account_name.len() > 24 {
            return Err(Error::Validation(format!(
                "The specified Azure Storage Account name is invalid, expected 3 to 24 \
                 characters: {}",
                self.account_name
            )));
        }

        if !self
            .account_name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err(Error::Validation(format!(
                "The specified Azure Storage Account name is invalid, expected numbers and \
                 lowercase characters: {}",
                self.account_name
            )));
        }

        if self.container_name.is_empty() {
            return Err(Error::Validation(
                "The Azure container name cannot be empty.".to_string(),
            ));
        }

        debug!(account = self.account_name, "using Azure storage account");

        match &self.sas_token {
            None => {
                if self.account_key.is_none() {
                    return Err(Error::Validation(
                        "No Azure Storage Account Key or Shared Access Signature Token is \
                         defined."
                            .to_string(),
                    ));
                }
                Ok(())
            }
            Some(token) => validate_sas_token(token, self.operation, sas_token_source),
        }
    }
}

struct Resolved {
    account_name: String,
    account_key: String,
    sas_token: String,
    sas_token_source: String,
    endpoint: String,
    endpoint_protocol: String,
    endpoint_suffix: String,
}

impl Resolved {
    /// `;`-separated `key=value` list, as emitted by the Azure portal.
    fn load_connection_string(&mut self, connection_string: &str) {
        for item in connection_string.split(';') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }

            let (key, value) = match item.split_once('=') {
                Some((key, value)) => (key.trim(), value.trim()),
                None => (item, ""),
            };

            if self.endpoint.is_empty() && key.eq_ignore_ascii_case("BlobEndpoint") {
                self.endpoint = value.trim_end_matches('/').to_string();
            } else if self.endpoint_protocol.is_empty()
                && key.eq_ignore_ascii_case("DefaultEndpointsProtocol")
            {
                self.endpoint_protocol = value.to_string();
            } else if self.account_name.is_empty() && key.eq_ignore_ascii_case("AccountName") {
                self.account_name = value.to_string();
            } else if self.account_key.is_empty() && key.eq_ignore_ascii_case("AccountKey") {
                self.account_key = value.to_string();
            } else if self.endpoint_suffix.is_empty()
                && key.eq_ignore_ascii_case("EndpointSuffix")
            {
                self.endpoint_suffix = value.to_string();
            }
        }
    }

    fn load_env_vars(&mut self) {
        if let Ok(connection_string) = env::var(CONNECTION_STRING_ENV) {
            self.load_connection_string(&connection_string);
        }

        if self.account_name.is_empty() {
            if let Ok(account) = env::var(ACCOUNT_ENV) {
                self.account_name = account;
            }
        }

        if self.account_key.is_empty() {
            if let Ok(key) = env::var(KEY_ENV) {
                self.account_key = key;
            }
        }

        if self.sas_token.is_empty() {
            if let Ok(token) = env::var(SAS_TOKEN_ENV) {
                self.sas_token = token;
                self.sas_token_source =
                    format!("the '{SAS_TOKEN_ENV}' environment variable");
            }
        }
    }
}

fn sas_token_error(source: &str, error: &str) -> Error {
    Error::Validation(format!(
        "The Shared Access Signature Token defined at {source} is invalid, {error}"
    ))
}

fn validate_sas_token(token: &str, operation: Operation, source: &str) -> Result<()> {
    let parameters: Vec<(String, String)> = token
        .trim_start_matches('?')
        .split('&')
        .filter(|item| !item.is_empty())
        .map(|item| match item.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (item.to_string(), String::new()),
        })
        .collect();

    let find = |key: &str| -> Option<&str> {
        parameters
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    };

    // `ss`/`srt` mark an account-level token; container tokens carry `sr`
    let account_token = find("ss").is_some() || find("srt").is_some();

    let mut required = vec!["sv", "sp", "se", "sig"];
    if account_token {
        required.push("srt");
        required.push("ss");
    } else {
        required.push("sr");
    }

    let mut missing_attributes = Vec::new();

    for attribute in required {
        let Some(value) = find(attribute) else {
            missing_attributes.push(sas_attribute_name(attribute));
            continue;
        };

        match attribute {
            "ss" if !value.contains('b') => {
                return Err(sas_token_error(
                    source,
                    "it is missing access to the Blob Storage Service",
                ));
            }
            "sp" => {
                let mut missing_permissions = Vec::new();

                for permission in ['l', 'r'] {
                    if !value.contains(permission) {
                        missing_permissions.push(sas_permission_name(permission).to_string());
                    }
                }

                if operation == Operation::Write
                    && !value.contains('c')
                    && !value.contains('w')
                {
                    missing_permissions.push(format!(
                        "{} or {}",
                        sas_permission_name('c'),
                        sas_permission_name('w')
                    ));
                }

                if !missing_permissions.is_empty() {
                    return Err(sas_token_error(
                        source,
                        &format!(
                            "it is missing the following permissions: {}",
                            missing_permissions.join(", ")
                        ),
                    ));
                }
            }
            "sr" if value != "c" => {
                return Err(sas_token_error(source, "does not give access to the container"));
            }
            "srt" => {
                if !value.contains('c') {
                    return Err(sas_token_error(
                        source,
                        "does not give access to the container",
                    ));
                }
                if !value.contains('o') {
                    return Err(sas_token_error(
                        source,
                        "does not give access to the container objects",
                    ));
                }
            }
            _ => {}
        }
    }

    if !missing_attributes.is_empty() {
        return Err(sas_token_error(
            source,
            &format!(
                "the following attributes are missing: {}",
                missing_attributes.join(", ")
            ),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn options() -> AzureOptions {
        AzureOptions {
            container_name: "dump".to_string(),
            account: Some("devaccount1".to_string()),
            key: Some("a2V5".to_string()),
            enable_env_vars: false,
            ..AzureOptions::default()
        }
    }

    #[test]
    fn default_endpoint_uses_the_public_suffix() {
        let config = AzureConfig::new(options()).unwrap();
        assert_eq!(config.endpoint, "https://devaccount1.blob.core.windows.net");
        assert_eq!(config.account_key.as_deref(), Some("a2V5"));
    }

    #[test]
    fn connection_string_fills_missing_values() {
        let config = AzureConfig::new(AzureOptions {
            account: None,
            key: None,
            connection_string: Some(
                "DefaultEndpointsProtocol=http;AccountName=devstoreaccount1;\
                 AccountKey=a2V5MQ==;BlobEndpoint=http://127.0.0.1:10000/devstoreaccount1"
                    .to_string(),
            ),
            ..options()
        })
        .unwrap();

        assert_eq!(config.account_name, "devstoreaccount1");
        assert_eq!(config.account_key.as_deref(), Some("a2V5MQ=="));
        assert_eq!(config.endpoint, "http://127.0.0.1:10000/devstoreaccount1");
    }

    #[test]
    fn account_name_shape_is_validated() {
        let err = AzureConfig::new(AzureOptions {
            account: Some("Bad_Account".to_string()),
            ..options()
        })
        .unwrap_err();
        assert!(err
            .to_string()
            .contains("expected numbers and lowercase characters"));

        let err = AzureConfig::new(AzureOptions {
            account: Some("ab".to_string()),
            ..options()
        })
        .unwrap_err();
        assert!(err.to_string().contains("expected 3 to 24 characters"));
    }

    #[test]
    fn key_or_sas_is_required() {
        let err = AzureConfig::new(AzureOptions {
            key: None,
            ..options()
        })
        .unwrap_err();
        assert!(err
            .to_string()
            .contains("No Azure Storage Account Key or Shared Access Signature Token"));
    }

    #[test]
    fn container_sas_token_is_accepted() {
        let config = AzureConfig::new(AzureOptions {
            key: None,
            sas_token: Some("sv=2020-08-04&sp=rl&se=2030-01-01&sr=c&sig=abc".to_string()),
            ..options()
        })
        .unwrap();
        assert_eq!(
            config.sas_token.as_deref(),
            Some("sv=2020-08-04&sp=rl&se=2030-01-01&sr=c&sig=abc")
        );
    }

    #[test]
    fn sas_token_missing_attributes() {
        let err = AzureConfig::new(AzureOptions {
            key: None,
            sas_token: Some("sv=2020-08-04&sp=rl&sr=c&sig=abc".to_string()),
            ..options()
        })
        .unwrap_err();
        assert!(err
            .to_string()
            .contains("the following attributes are missing: Expiration Time"));
    }

    #[test]
    fn sas_token_write_needs_create_or_write_permission() {
        let err = AzureConfig::new(AzureOptions {
            key: None,
            sas_token: Some("sv=2020-08-04&sp=rl&se=2030-01-01&sr=c&sig=abc".to_string()),
            operation: Operation::Write,
            ..options()
        })
        .unwrap_err();
        assert!(err
            .to_string()
            .contains("it is missing the following permissions: Create or Write"));

        assert!(AzureConfig::new(AzureOptions {
            key: None,
            sas_token: Some("sv=2020-08-04&sp=rlc&se=2030-01-01&sr=c&sig=abc".to_string()),
            operation: Operation::Write,
            ..options()
        })
        .is_ok());
    }

    #[test]
    fn account_sas_token_needs_blob_service_and_resource_types() {
        let err = AzureConfig::new(AzureOptions {
            key: None,
            sas_token: Some(
                "sv=2020-08-04&sp=rl&se=2030-01-01&ss=f&srt=co&sig=abc".to_string(),
            ),
            ..options()
        })
        .unwrap_err();
        assert!(err
            .to_string()
            .contains("missing access to the Blob Storage Service"));

        let err = AzureConfig::new(AzureOptions {
            key: None,
            sas_token: Some(
                "sv=2020-08-04&sp=rl&se=2030-01-01&ss=b&srt=s&sig=abc".to_string(),
            ),
            ..options()
        })
        .unwrap_err();
        assert!(err.to_string().contains("does not give access to the container"));
    }

    #[test]
    fn container_resource_must_be_a_container() {
        let err = AzureConfig::new(AzureOptions {
            key: None,
            sas_token: Some("sv=2020-08-04&sp=rl&se=2030-01-01&sr=b&sig=abc".to_string()),
            ..options()
        })
        .unwrap_err();
        assert!(err.to_string().contains("does not give access to the container"));
    }
}
