use {
    anyhow::{Context as _, Result, format_err},
    cloudex_protocol::AccessToken,
    cloudex_sdk::{link::DEFAULT_NR_OF_PARTS, store::Buckets},
    derivative::Derivative,
    serde::{Deserialize, Serialize},
    std::{env, path::PathBuf},
    url::Url,
};

/// Environment variable consulted when the config has no `access_token`.
pub const ACCESS_TOKEN_ENV: &str = "CLOUDEX_ACCESS_TOKEN";

#[derive(Derivative, Clone, Serialize, Deserialize)]
#[derivative(Debug)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    Http {
        endpoint: Url,
        #[serde(default)]
        #[derivative(Debug = "ignore")]
        access_token: Option<AccessToken>,
    },
    Directory {
        path: PathBuf,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub buckets: Buckets,
    #[serde(default = "default_encrypt")]
    pub encrypt: bool,
    #[serde(default = "default_nr_of_parts")]
    pub nr_of_parts: usize,
    #[serde(default)]
    pub links_file: Option<PathBuf>,
    #[serde(default)]
    pub import_dir: Option<PathBuf>,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_encrypt() -> bool {
    true
}

fn default_nr_of_parts() -> usize {
    DEFAULT_NR_OF_PARTS
}

fn default_log_filter() -> String {
    "info".into()
}

fn data_dir() -> Result<PathBuf> {
    Ok(dirs::data_dir()
        .ok_or_else(|| format_err!("failed to get data dir"))?
        .join("cloudex"))
}

impl Config {
    #[inline]
    pub fn parse(text: &str) -> Result<Self> {
        json5::from_str(text).context("invalid config")
    }

    #[inline]
    pub fn links_file(&self) -> Result<PathBuf> {
        match &self.links_file {
            Some(path) => Ok(path.clone()),
            None => Ok(data_dir()?.join("links.json")),
        }
    }

    #[inline]
    pub fn import_dir(&self) -> Result<PathBuf> {
        match &self.import_dir {
            Some(path) => Ok(path.clone()),
            None => Ok(data_dir()?.join("import")),
        }
    }
}

/// Token from the config, or from [`ACCESS_TOKEN_ENV`] if the config has none.
#[inline]
pub fn resolve_access_token(configured: Option<&AccessToken>) -> Result<Option<AccessToken>> {
    if let Some(token) = configured {
        return Ok(Some(token.clone()));
    }
    match env::var(ACCESS_TOKEN_ENV) {
        Ok(value) => Ok(Some(
            value
                .parse()
                .with_context(|| format!("invalid {ACCESS_TOKEN_ENV}"))?,
        )),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("invalid {ACCESS_TOKEN_ENV}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = Config::parse(
            r#"{
                // shared folder on a NAS
                store: { kind: "directory", path: "/mnt/exchange" },
            }"#,
        )
        .unwrap();
        assert!(matches!(config.store, StoreConfig::Directory { ref path } if path == &PathBuf::from("/mnt/exchange")));
        assert_eq!(config.buckets, Buckets::default());
        assert!(config.encrypt);
        assert_eq!(config.nr_of_parts, 10);
        assert_eq!(config.log_filter, "info");
        assert!(config.links_file.is_none());
    }

    #[test]
    fn http_store_with_token() {
        let config = Config::parse(
            r#"{
                store: {
                    kind: "http",
                    endpoint: "https://storage.example.com/exchange/",
                    access_token: "secret-token",
                },
                buckets: { file: "files" },
                encrypt: false,
                nr_of_parts: 4,
                links_file: "/tmp/links.json",
            }"#,
        )
        .unwrap();
        let StoreConfig::Http {
            endpoint,
            access_token,
        } = &config.store
        else {
            panic!("expected http store");
        };
        assert_eq!(endpoint.as_str(), "https://storage.example.com/exchange/");
        assert_eq!(access_token.as_ref().unwrap().as_unmasked_str(), "secret-token");
        assert_eq!(config.buckets.file, "files");
        assert_eq!(config.buckets.index, "exchangeindex");
        assert!(!config.encrypt);
        assert_eq!(config.nr_of_parts, 4);
        assert_eq!(config.links_file().unwrap(), PathBuf::from("/tmp/links.json"));
        assert!(!format!("{config:?}").contains("secret-token"));
    }

    #[test]
    fn rejects_unknown_store_kind() {
        Config::parse(r#"{ store: { kind: "ftp", path: "/" } }"#).unwrap_err();
        Config::parse(r#"{ store: { kind: "http", endpoint: "https://x/", access_token: "a b" } }"#)
            .unwrap_err();
    }

    #[test]
    fn configured_token_wins() {
        let token: AccessToken = "from-config".parse().unwrap();
        let resolved = resolve_access_token(Some(&token)).unwrap().unwrap();
        assert_eq!(resolved.as_unmasked_str(), "from-config");
    }
}
