use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::time::Duration;

const ENV_PREFIX: &str = "RETRIEVER";
const DEFAULT_CONFIG_FILE: &str = "retriever";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub embedding: EmbeddingConfig,
    pub vector_store: VectorStoreConfig,
    pub search: SearchConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
    /// Deadline applied to every query, on top of the per-client timeouts.
    pub request_timeout_secs: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:1428".to_string(),
            request_timeout_secs: None,
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub url: String,
    pub model: String,
    pub timeout_secs: u64,
    /// Expected vector length. Unchecked when absent.
    pub dimensions: Option<usize>,
    pub api_key: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: "https://modelgarden.com/embeddings".to_string(),
            model: "embeddinggemma-300m".to_string(),
            timeout_secs: 60,
            dimensions: None,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VectorStoreConfig {
    pub url: String,
    pub token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:19530".to_string(),
            token: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionMode {
    /// The store fuses channels itself from the rerank directive.
    Server,
    /// One search per channel, fused locally.
    Client,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub collection: String,
    pub dense_field: String,
    pub sparse_field: String,
    pub dense_top_k: usize,
    pub sparse_top_k: usize,
    pub limit: usize,
    pub drop_ratio: f32,
    pub rrf_k: u32,
    pub output_fields: Vec<String>,
    pub text_field: String,
    pub fusion_mode: FusionMode,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            collection: "pdf_collection".to_string(),
            dense_field: "vector_dense".to_string(),
            sparse_field: "vector_sparse".to_string(),
            dense_top_k: 2,
            sparse_top_k: 2,
            limit: 2,
            drop_ratio: 0.2,
            rrf_k: 60,
            output_fields: vec!["text".to_string(), "metadata".to_string()],
            text_field: "text".to_string(),
            fusion_mode: FusionMode::Server,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Loads `.env`, then `retriever.toml` (or the file named by
    /// `RETRIEVER_CONFIG_FILE`), then `RETRIEVER_<SECTION>__<KEY>` variables.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let file = std::env::var("RETRIEVER_CONFIG_FILE")
            .unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load(&file)
    }

    pub fn load(file: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(file).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("search.output_fields"),
            )
            .build()
            .context("Failed to read configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let search = &self.search;
        if search.collection.is_empty() {
            bail!("search.collection must not be empty");
        }
        if search.dense_field.is_empty() || search.sparse_field.is_empty() {
            bail!("search.dense_field and search.sparse_field must not be empty");
        }
        if search.text_field.is_empty() {
            bail!("search.text_field must not be empty");
        }
        if search.dense_top_k == 0 || search.sparse_top_k == 0 || search.limit == 0 {
            bail!("search candidate counts and limit must be at least 1");
        }
        if !(0.0..1.0).contains(&search.drop_ratio) {
            bail!("search.drop_ratio must be in [0, 1), got {}", search.drop_ratio);
        }
        if !search.output_fields.contains(&search.text_field) {
            bail!(
                "search.output_fields must include the text field '{}'",
                search.text_field
            );
        }
        if self.embedding.timeout_secs == 0 || self.vector_store.timeout_secs == 0 {
            bail!("client timeouts must be at least one second");
        }
        Ok(())
    }
}
